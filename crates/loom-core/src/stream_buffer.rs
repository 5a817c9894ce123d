// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Composes [`MarkdownBuffer`] and [`ThoughtBuffer`], interleaves
//! non-markdown events around markdown flushes, and assigns sequence
//! numbers at emit time via an injected [`SeqProvider`].
//!
//! # Central invariant
//!
//! A tool-call, tool-update, or plan event may never appear between the
//! start and end of a markdown block in the emitted stream — a client
//! rendering a fenced code block incrementally must never see a tool
//! notification interrupt it mid-block. Concretely:
//!
//! ```text
//! agent produces:  "```go\n"  ToolCall{..}  "fn f(){}\n```\n"
//! emitted as:       ToolCall{..}  AgentMessage{html: "<pre>...fn f(){}...</pre>"}
//!                   ^^^^^^^^^^^^  the tool call is *reordered* ahead of the
//!                                 block, not spliced into its middle
//! ```
//!
//! Events that arrive while [`MarkdownBuffer::in_block`] is true are parked
//! in `pending` and drained, in arrival order, once the block closes.
//! Events that arrive while the buffer is merely holding unflushed-but-not-
//! blocked prose force a flush of that prose first, so its seq is always
//! assigned before the interrupting event's — never after.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::event::{Event, EventPayload, PlanEntry, ToolCallStatus};
use crate::markdown_buffer::{MarkdownBuffer, MarkdownBufferConfig};
use crate::seq::SeqProvider;
use crate::thought_buffer::{ThoughtBuffer, ThoughtBufferConfig};

/// Sink the composite buffer emits finished, sequenced events into —
/// typically `BackgroundSession`'s combined record+fan-out callback.
pub type EmitSink = Arc<dyn Fn(Event) + Send + Sync>;

/// One incoming agent-side event, pre-buffering.
#[derive(Debug, Clone)]
pub enum AgentInput {
    MessageChunk(String),
    ThoughtChunk(String),
    ToolCall { id: String, title: String, status: ToolCallStatus },
    ToolCallUpdate { id: String, status: Option<ToolCallStatus> },
    Plan { entries: Vec<PlanEntry> },
}

#[derive(Debug, Clone)]
enum Pending {
    Thought(String),
    ToolCall { id: String, title: String, status: ToolCallStatus },
    ToolCallUpdate { id: String, status: Option<ToolCallStatus> },
    Plan { entries: Vec<PlanEntry> },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamBufferConfig {
    /// Experimental: forces a markdown flush mid-block on a tool call,
    /// trading intact blocks for earlier visibility. Default off.
    pub flush_on_tool_call: bool,
}

pub struct StreamBuffer {
    markdown: Arc<MarkdownBuffer>,
    thoughts: Arc<ThoughtBuffer>,
    pending: Mutex<VecDeque<Pending>>,
    seq: SeqProvider,
    emit: EmitSink,
    config: StreamBufferConfig,
}

impl StreamBuffer {
    pub fn new(
        md_config: MarkdownBufferConfig,
        thought_config: ThoughtBufferConfig,
        config: StreamBufferConfig,
        seq: SeqProvider,
        emit: EmitSink,
    ) -> Arc<Self> {
        {
            // markdown/thought callbacks capture only seq+emit, not `self`,
            // so there is no re-entrancy into StreamBuffer from inside the
            // MarkdownBuffer/ThoughtBuffer locks.
            let seq_for_md = seq.clone();
            let emit_for_md = Arc::clone(&emit);
            let markdown = MarkdownBuffer::new(
                md_config,
                Arc::new(move |html: String| {
                    let ev = Event::new(seq_for_md.next_seq(), EventPayload::AgentMessage { html });
                    (emit_for_md)(ev);
                }),
            );

            let seq_for_th = seq.clone();
            let emit_for_th = Arc::clone(&emit);
            let thoughts = ThoughtBuffer::new(
                thought_config,
                Arc::new(move |text: String| {
                    let ev = Event::new(seq_for_th.next_seq(), EventPayload::AgentThought { text });
                    (emit_for_th)(ev);
                }),
            );

            Arc::new(Self {
                markdown,
                thoughts,
                pending: Mutex::new(VecDeque::new()),
                seq,
                emit,
                config,
            })
        }
    }

    pub fn handle(self: &Arc<Self>, input: AgentInput) {
        match input {
            AgentInput::MessageChunk(chunk) => {
                self.thoughts.force_flush();
                self.markdown.write(&chunk);
                if !self.markdown.in_block() {
                    self.drain_pending();
                }
            }
            AgentInput::ThoughtChunk(text) => {
                if self.markdown.in_block() {
                    self.pending.lock().unwrap().push_back(Pending::Thought(text));
                } else {
                    self.markdown.flush();
                    self.thoughts.write(&text);
                }
            }
            AgentInput::ToolCall { id, title, status } => {
                if self.markdown.in_block() && !self.config.flush_on_tool_call {
                    self.pending.lock().unwrap().push_back(Pending::ToolCall { id, title, status });
                } else {
                    self.markdown.flush();
                    self.thoughts.force_flush();
                    self.emit_tool_call(id, title, status);
                }
            }
            AgentInput::ToolCallUpdate { id, status } => {
                if self.markdown.in_block() && !self.config.flush_on_tool_call {
                    self.pending.lock().unwrap().push_back(Pending::ToolCallUpdate { id, status });
                } else {
                    self.markdown.flush();
                    self.thoughts.force_flush();
                    self.emit_tool_call_update(id, status);
                }
            }
            AgentInput::Plan { entries } => {
                if self.markdown.in_block() {
                    self.pending.lock().unwrap().push_back(Pending::Plan { entries });
                } else {
                    self.markdown.flush();
                    self.thoughts.force_flush();
                    self.emit_plan(entries);
                }
            }
        }
    }

    fn drain_pending(self: &Arc<Self>) {
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            let Some(item) = next else { break };
            match item {
                Pending::Thought(text) => {
                    self.markdown.flush();
                    self.thoughts.write(&text);
                }
                Pending::ToolCall { id, title, status } => {
                    self.markdown.flush();
                    self.thoughts.force_flush();
                    self.emit_tool_call(id, title, status);
                }
                Pending::ToolCallUpdate { id, status } => {
                    self.markdown.flush();
                    self.thoughts.force_flush();
                    self.emit_tool_call_update(id, status);
                }
                Pending::Plan { entries } => {
                    self.markdown.flush();
                    self.thoughts.force_flush();
                    self.emit_plan(entries);
                }
            }
        }
    }

    fn emit_tool_call(&self, id: String, title: String, status: ToolCallStatus) {
        let ev = Event::new(self.seq.next_seq(), EventPayload::ToolCall { id, title, status });
        (self.emit)(ev);
    }

    fn emit_tool_call_update(&self, id: String, status: Option<ToolCallStatus>) {
        let ev = Event::new(self.seq.next_seq(), EventPayload::ToolCallUpdate { id, status });
        (self.emit)(ev);
    }

    fn emit_plan(&self, entries: Vec<PlanEntry>) {
        let ev = Event::new(self.seq.next_seq(), EventPayload::Plan { entries });
        (self.emit)(ev);
    }

    /// Flush markdown, flush thoughts, then drain whatever is left pending.
    /// Called at prompt end.
    pub fn flush(self: &Arc<Self>) {
        self.markdown.flush();
        self.thoughts.force_flush();
        self.drain_pending();
    }

    pub fn in_block(&self) -> bool {
        self.markdown.in_block()
    }
}
