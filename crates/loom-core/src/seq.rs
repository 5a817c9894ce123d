// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Assigns monotonically increasing, gap-free sequence numbers at emit time.
///
/// Every outgoing callback on [`crate::stream_buffer::StreamBuffer`] takes its
/// seq from the same shared provider immediately before invocation — not when
/// the underlying chunk arrived on the wire. This is what keeps seq dense
/// over what a client actually observes rather than over what the agent sent.
#[derive(Clone)]
pub struct SeqProvider {
    next: Arc<AtomicI64>,
}

impl SeqProvider {
    /// A fresh provider whose first `next_seq()` call returns 1.
    pub fn new() -> Self {
        Self { next: Arc::new(AtomicI64::new(1)) }
    }

    /// Resume a provider that has already emitted up to and including `last_seq`.
    pub fn resume_after(last_seq: i64) -> Self {
        Self { next: Arc::new(AtomicI64::new(last_seq + 1)) }
    }

    /// Atomically takes and returns the next sequence number.
    pub fn next_seq(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The value that would be returned by the next call, without consuming it.
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for SeqProvider {
    fn default() -> Self {
        Self::new()
    }
}
