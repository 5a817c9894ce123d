// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod error;
pub mod event;
pub mod markdown_buffer;
pub mod render;
pub mod seq;
pub mod stream_buffer;
pub mod thought_buffer;

pub use error::{CoreError, Result};
pub use event::{CoalesceKind, Event, EventPayload, PermissionOption, PermissionOptionKind, PlanEntry, ToolCallStatus};
pub use markdown_buffer::{MarkdownBuffer, MarkdownBufferConfig};
pub use seq::SeqProvider;
pub use stream_buffer::{AgentInput, EmitSink, StreamBuffer, StreamBufferConfig};
pub use thought_buffer::{ThoughtBuffer, ThoughtBufferConfig};
