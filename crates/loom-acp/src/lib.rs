// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod client;
pub mod connection;
pub mod error;

pub use client::{AcpClient, PermissionPolicy};
pub use connection::{parse_agent_command, run_on_local_set, AgentConnection, RunResult};
pub use error::{AcpError, Result};
