// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The session server's configuration schema: HTTP bind address and token
//! file, buffer timing knobs, and the workspace registry new sessions are
//! created against.

pub mod loader;

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use loader::load;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub buffers: BufferConfig,
    pub workspaces: Vec<WorkspaceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self { http: HttpConfig::default(), buffers: BufferConfig::default(), workspaces: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    pub token_file: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8787".parse().unwrap(), token_file: None }
    }
}

/// Mirrors `StreamBufferConfig`/`MarkdownBufferConfig`/`ThoughtBufferConfig`
/// timing knobs, expressed in milliseconds for a human-editable config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub soft_flush_ms: u64,
    pub hard_flush_ms: u64,
    pub observer_channel_bound: usize,
    pub queue_bound: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { soft_flush_ms: 400, hard_flush_ms: 2_500, observer_channel_bound: 256, queue_bound: 32 }
    }
}

/// A configured agent target new sessions can be created against, as
/// loaded from the config file. Distinct from `loom_session::WorkspaceEntry`
/// in that it has no `uuid` yet — one is minted when the session manager
/// actually creates a session from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub acp_server_name: String,
    pub acp_command: String,
    pub working_dir: PathBuf,
    pub display_name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_to_loopback() {
        let cfg = Config::default();
        assert!(cfg.http.bind.ip().is_loopback());
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.http.bind, cfg.http.bind);
    }
}
