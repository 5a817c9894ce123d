// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod error;
pub mod event_log;
pub mod metadata;
pub mod queue;
pub mod store;

pub use error::{Result, StoreError};
pub use event_log::EventLog;
pub use metadata::{SessionMetadata, SessionStatus};
pub use queue::{MessageQueue, QueueFull, QueuedMessage};
pub use store::{Store, SyncResult};
