// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The per-session prompt queue. Messages that arrive while a prompt is
//! already in flight are held here, FIFO, until the session goes idle.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    pub id: String,
    pub text: String,
    pub image_refs: Vec<String>,
    pub client_id: String,
    pub created_at: String,
    pub title: Option<String>,
}

/// FIFO queue of pending prompts, bounded by `max_size`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageQueue {
    messages: VecDeque<QueuedMessage>,
    #[serde(skip)]
    max_size: usize,
}

/// Returned when a push would exceed the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl MessageQueue {
    pub fn new(max_size: usize) -> Self {
        Self { messages: VecDeque::new(), max_size }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn push(&mut self, msg: QueuedMessage) -> Result<(), QueueFull> {
        if self.max_size > 0 && self.messages.len() >= self.max_size {
            return Err(QueueFull);
        }
        self.messages.push_back(msg);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> QueuedMessage {
        QueuedMessage {
            id: id.into(),
            text: format!("message {id}"),
            image_refs: vec![],
            client_id: "client-1".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            title: None,
        }
    }

    #[test]
    fn fifo_order_preserved() {
        let mut q = MessageQueue::new(10);
        q.push(msg("a")).unwrap();
        q.push(msg("b")).unwrap();
        assert_eq!(q.pop_front().unwrap().id, "a");
        assert_eq!(q.pop_front().unwrap().id, "b");
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn push_past_bound_returns_queue_full() {
        let mut q = MessageQueue::new(1);
        q.push(msg("a")).unwrap();
        assert_eq!(q.push(msg("b")), Err(QueueFull));
    }

    #[test]
    fn zero_max_size_means_unbounded() {
        let mut q = MessageQueue::new(0);
        for i in 0..50 {
            q.push(msg(&i.to_string())).unwrap();
        }
        assert_eq!(q.len(), 50);
    }
}
