// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The JSON-over-WebSocket wire envelope between browser clients and a
//! session's [`loom_session::BackgroundSession`]. Every frame is a tagged
//! `{"type": "...", ...}` object, matched exhaustively on both ends rather
//! than carried as a generic map.

use loom_core::{Event, EventPayload, PermissionOption, PlanEntry, ToolCallStatus};
use loom_store::SessionStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Prompt {
        message: String,
        #[serde(default)]
        image_ids: Vec<String>,
        #[serde(default)]
        prompt_id: Option<String>,
    },
    Cancel,
    PermissionAnswer {
        request_id: String,
        #[serde(default)]
        option_id: Option<String>,
    },
    RenameSession {
        name: String,
    },
    SyncSession {
        session_id: Uuid,
        after_seq: i64,
    },
    Keepalive {
        timestamp: String,
    },
    SetConfigOption {
        config_id: String,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: Uuid,
        client_id: Uuid,
        acp_server: String,
    },
    SessionCreated {
        session_id: Uuid,
    },
    SessionSwitched {
        session_id: Uuid,
    },
    SessionRenamed {
        session_id: Uuid,
        name: String,
    },
    SessionDeleted {
        session_id: Uuid,
    },
    AgentMessage {
        seq: i64,
        html: String,
    },
    AgentThought {
        seq: i64,
        text: String,
    },
    ToolCall {
        seq: i64,
        id: String,
        title: String,
        status: ToolCallStatus,
    },
    ToolUpdate {
        seq: i64,
        id: String,
        status: Option<ToolCallStatus>,
    },
    Plan {
        seq: i64,
        entries: Vec<PlanEntry>,
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
    SessionLoaded {
        events: Vec<Event>,
    },
    PromptReceived {
        prompt_id: String,
    },
    UserPrompt {
        seq: i64,
        sender_id: String,
        prompt_id: String,
        message: String,
        image_ids: Vec<String>,
    },
    PromptComplete {
        seq: i64,
        event_count: u64,
    },
    FileRead {
        seq: i64,
        path: String,
    },
    FileWrite {
        seq: i64,
        path: String,
    },
    SessionSync {
        session_id: Uuid,
        after_seq: i64,
        events: Vec<Event>,
        event_count: u64,
        status: SessionStatus,
        is_running: bool,
    },
    KeepaliveAck {
        client_timestamp: String,
        server_timestamp: String,
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

impl From<Event> for ServerMessage {
    fn from(event: Event) -> Self {
        let seq = event.seq;
        match event.payload {
            EventPayload::UserPrompt { prompt_id, sender_id, message, image_ids } => {
                ServerMessage::UserPrompt { seq, sender_id, prompt_id, message, image_ids }
            }
            EventPayload::AgentMessage { html } => ServerMessage::AgentMessage { seq, html },
            EventPayload::AgentThought { text } => ServerMessage::AgentThought { seq, text },
            EventPayload::ToolCall { id, title, status } => ServerMessage::ToolCall { seq, id, title, status },
            EventPayload::ToolCallUpdate { id, status } => ServerMessage::ToolUpdate { seq, id, status },
            EventPayload::Plan { entries } => ServerMessage::Plan { seq, entries },
            EventPayload::FileRead { path } => ServerMessage::FileRead { seq, path },
            EventPayload::FileWrite { path } => ServerMessage::FileWrite { seq, path },
            EventPayload::Permission { request_id, title, options } => {
                ServerMessage::Permission { request_id, title, options }
            }
            EventPayload::Error { message, code } => ServerMessage::Error { message, code },
            EventPayload::PromptComplete { event_count } => ServerMessage::PromptComplete { seq, event_count },
            EventPayload::QueueUpdated { queue_len } => ServerMessage::QueueUpdated { queue_len },
            EventPayload::QueueMessageSending { message_id } => ServerMessage::QueueMessageSending { message_id },
            EventPayload::QueueMessageSent { message_id } => ServerMessage::QueueMessageSent { message_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_prompt_parses_with_defaulted_fields() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"prompt","message":"hi"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Prompt { image_ids, prompt_id: None, .. } if image_ids.is_empty()));
    }

    #[test]
    fn client_cancel_has_no_fields() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Cancel));
    }

    #[test]
    fn server_message_tag_is_snake_case() {
        let msg = ServerMessage::PromptComplete { seq: 5, event_count: 5 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "prompt_complete");
        assert_eq!(json["event_count"], 5);
    }

    #[test]
    fn event_to_server_message_preserves_seq() {
        let ev = Event::new(9, EventPayload::AgentMessage { html: "<p>hi</p>".into() });
        let msg: ServerMessage = ev.into();
        match msg {
            ServerMessage::AgentMessage { seq, html } => {
                assert_eq!(seq, 9);
                assert_eq!(html, "<p>hi</p>");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
