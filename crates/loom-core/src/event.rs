// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The closed event schema shared by the live WebSocket envelope and the
//! on-disk event log.
//!
//! # Why a closed enum, not a generic payload map
//!
//! A dynamic `HashMap<String, Value>` payload was considered and rejected:
//! every event kind this server emits has a concrete, known-in-advance
//! schema, so a tagged union gives callers exhaustive matching at compile
//! time instead of stringly-typed field lookups that can silently miss a
//! variant. Adding a new event kind is then a compiler-enforced exercise —
//! every `match` over [`EventPayload`] (the wire conversion in
//! `loom-gateway`'s `protocol.rs`, the coalescing logic below) fails to
//! build until it is handled.
//!
//! ```
//! use loom_core::{Event, EventPayload};
//!
//! let ev = Event::new(1, EventPayload::PromptComplete { event_count: 3 });
//! assert_eq!(ev.seq, 1);
//! ```

use serde::{Deserialize, Serialize};

/// One atomic, immutable record in a session's event log.
///
/// `seq` is assigned once, at emit time, by the owning [`crate::seq::SeqProvider`]
/// and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub seq: i64,
    /// RFC 3339 timestamp, assigned when the event is emitted.
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(seq: i64, payload: EventPayload) -> Self {
        Self { seq, timestamp: now_rfc3339(), payload }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// The closed set of event kinds a session's log may contain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    UserPrompt {
        prompt_id: String,
        sender_id: String,
        message: String,
        image_ids: Vec<String>,
    },
    AgentMessage {
        html: String,
    },
    AgentThought {
        text: String,
    },
    ToolCall {
        id: String,
        title: String,
        status: ToolCallStatus,
    },
    ToolCallUpdate {
        id: String,
        status: Option<ToolCallStatus>,
    },
    Plan {
        entries: Vec<PlanEntry>,
    },
    FileRead {
        path: String,
    },
    FileWrite {
        path: String,
    },
    Permission {
        request_id: String,
        title: String,
        options: Vec<PermissionOption>,
    },
    Error {
        message: String,
        code: Option<u32>,
    },
    PromptComplete {
        event_count: u64,
    },
    QueueUpdated {
        queue_len: usize,
    },
    QueueMessageSending {
        message_id: String,
    },
    QueueMessageSent {
        message_id: String,
    },
}

impl EventPayload {
    /// Whether consecutive events of this kind should be coalesced by the
    /// `EventBuffer` (same payload concatenated, seq of the first kept).
    ///
    /// Only streamed-text kinds coalesce; structural events (tool calls,
    /// file ops, …) always start a new log entry.
    pub fn coalesce_kind(&self) -> Option<CoalesceKind> {
        match self {
            EventPayload::AgentMessage { .. } => Some(CoalesceKind::AgentMessage),
            EventPayload::AgentThought { .. } => Some(CoalesceKind::AgentThought),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceKind {
    AgentMessage,
    AgentThought,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanEntry {
    pub content: String,
    pub status: ToolCallStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionOption {
    pub id: String,
    pub label: String,
    pub kind: PermissionOptionKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
}
