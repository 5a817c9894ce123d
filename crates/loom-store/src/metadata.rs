// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Suspended,
    Ended,
}

/// The durable record describing a session, independent of whether a
/// `BackgroundSession` runtime instance currently exists for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    pub session_id: Uuid,
    pub name: String,
    pub acp_server: String,
    pub acp_command: Vec<String>,
    pub working_dir: String,
    pub created_at: String,
    pub event_count: u64,
    pub status: SessionStatus,
    pub archived: bool,
}

impl SessionMetadata {
    pub fn new(
        session_id: Uuid,
        name: impl Into<String>,
        acp_server: impl Into<String>,
        acp_command: Vec<String>,
        working_dir: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            name: name.into(),
            acp_server: acp_server.into(),
            acp_command,
            working_dir: working_dir.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            event_count: 0,
            status: SessionStatus::Active,
            archived: false,
        }
    }
}
