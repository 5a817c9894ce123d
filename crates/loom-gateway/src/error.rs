// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error(transparent)]
    Session(#[from] loom_session::SessionError),

    #[error(transparent)]
    Store(#[from] loom_store::StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
