// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("session {0} already has a prompt in flight")]
    AlreadyRunning(Uuid),

    #[error("session {0} already exists")]
    AlreadyExists(Uuid),

    #[error(transparent)]
    Acp(#[from] loom_acp::AcpError),

    #[error(transparent)]
    Store(#[from] loom_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
