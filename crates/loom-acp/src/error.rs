// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AcpError {
    #[error("invalid agent command: {0}")]
    InvalidCommand(String),

    #[error("failed to spawn agent process {program}: {source}")]
    Spawn { program: String, source: std::io::Error },

    #[error("agent process for session {0} has no stdin/stdout pipes")]
    MissingPipes(Uuid),

    #[error("ACP initialize failed: {0}")]
    Initialize(String),

    #[error("ACP new_session failed: {0}")]
    NewSession(String),

    #[error("ACP prompt failed: {0}")]
    Prompt(String),

    #[error("file operation on {path} failed: {source}")]
    FileIo { path: String, source: std::io::Error },

    #[error("agent process exited before the handshake completed")]
    ProcessExited,
}

impl AcpError {
    /// Whether the underlying agent subprocess is gone or never existed, as
    /// opposed to a recoverable protocol-level failure on an otherwise-live
    /// connection. Fatal errors end the session; the rest just surface as an
    /// error event on the current prompt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AcpError::InvalidCommand(_) | AcpError::Spawn { .. } | AcpError::MissingPipes(_) | AcpError::ProcessExited
        )
    }
}

pub type Result<T> = std::result::Result<T, AcpError>;
