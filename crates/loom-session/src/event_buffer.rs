// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory, per-prompt log of emitted events. Coalesces consecutive
//! chunks of the same streamed-text kind so the persisted log stays
//! compact even though live observers saw every individual flush.

use loom_core::Event;
use loom_store::Store;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct EventBuffer {
    entries: Vec<Event>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends one event, merging it into the previous entry if both are
    /// the same coalescing kind. Returns whether this created a new entry
    /// (`false` means an existing entry's payload was extended).
    pub fn append(&mut self, event: Event) -> bool {
        if let Some(kind) = event.payload.coalesce_kind() {
            if let Some(last) = self.entries.last_mut() {
                if last.payload.coalesce_kind() == Some(kind) {
                    if merge_payload(&mut last.payload, event.payload) {
                        return false;
                    }
                }
            }
        }
        self.entries.push(event);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invokes `observer` once per buffered entry, in log order.
    pub fn replay_to(&self, mut observer: impl FnMut(&Event)) {
        for entry in &self.entries {
            observer(entry);
        }
    }

    /// Writes every buffered entry to the store's append-only log, then
    /// drains the buffer.
    pub async fn persist_to(&mut self, store: &Store, session_id: Uuid) -> loom_store::Result<()> {
        for entry in self.entries.drain(..) {
            store.append_event(session_id, &entry).await?;
        }
        Ok(())
    }
}

fn merge_payload(dst: &mut loom_core::EventPayload, src: loom_core::EventPayload) -> bool {
    use loom_core::EventPayload::*;
    match (dst, src) {
        (AgentMessage { html }, AgentMessage { html: more }) => {
            html.push_str(&more);
            true
        }
        (AgentThought { text }, AgentThought { text: more }) => {
            text.push_str(&more);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::EventPayload;

    fn msg(seq: i64, html: &str) -> Event {
        Event::new(seq, EventPayload::AgentMessage { html: html.into() })
    }

    #[test]
    fn consecutive_agent_messages_coalesce() {
        let mut buf = EventBuffer::new();
        assert!(buf.append(msg(1, "hello ")));
        assert!(!buf.append(msg(2, "world")));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn tool_call_breaks_coalescing() {
        let mut buf = EventBuffer::new();
        assert!(buf.append(msg(1, "a")));
        assert!(buf.append(Event::new(
            2,
            EventPayload::ToolCall { id: "t1".into(), title: "Read".into(), status: loom_core::ToolCallStatus::Running }
        )));
        assert!(buf.append(msg(3, "b")));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn replay_visits_entries_in_order() {
        let mut buf = EventBuffer::new();
        buf.append(msg(1, "a"));
        buf.append(Event::new(2, EventPayload::PromptComplete { event_count: 1 }));
        let mut seen = vec![];
        buf.replay_to(|e| seen.push(e.seq));
        assert_eq!(seen, vec![1, 2]);
    }
}
