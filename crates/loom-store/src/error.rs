// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(uuid::Uuid),

    #[error("I/O error for session {session}: {source}")]
    Io {
        session: uuid::Uuid,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record in session {session} log: {detail}")]
    Corrupt { session: uuid::Uuid, detail: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
