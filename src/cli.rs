// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "loom",
    about = "Streaming session server bridging browser clients and ACP agent subprocesses",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides auto-discovery).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the session server (HTTP + WebSocket).
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Override the configured bearer-token file path.
        #[arg(long)]
        token_file: Option<PathBuf>,
    },
    /// Regenerate the HTTP bearer token. The new token is printed once;
    /// the old one is immediately invalidated.
    RegenerateToken {
        #[arg(long)]
        token_file: Option<PathBuf>,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    use clap::CommandFactory;
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "loom", &mut std::io::stdout());
}
