// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use loom_session::{BackgroundSessionConfig, SessionManager};
use loom_store::Store;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
        Commands::ShowConfig => {
            let config = loom_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::RegenerateToken { token_file } => {
            let path = token_file.unwrap_or_else(loom_gateway::serve::default_token_path);
            let raw = loom_gateway::token::StoredTokenFile::generate_and_save(&path)?;
            println!("New bearer token (save it now — it won't be shown again):");
            println!("  {}", raw.as_str());
            Ok(())
        }
        Commands::Serve { bind, token_file } => run_serve(cli.config, bind, token_file).await,
    }
}

async fn run_serve(
    config_path: Option<PathBuf>,
    bind_override: Option<std::net::SocketAddr>,
    token_file_override: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = loom_config::load(config_path.as_deref())?;
    let bind = bind_override.unwrap_or(config.http.bind);
    let token_path = token_file_override
        .or(config.http.token_file.clone())
        .unwrap_or_else(loom_gateway::serve::default_token_path);

    let data_dir = default_data_dir();
    tracing::info!(dir = %data_dir.display(), "using session store");
    let store = Arc::new(Store::new(&data_dir));

    let session_config = BackgroundSessionConfig {
        observer_channel_bound: config.buffers.observer_channel_bound,
        queue_bound: config.buffers.queue_bound,
        ..BackgroundSessionConfig::default()
    };
    let manager = Arc::new(SessionManager::new(Arc::clone(&store), session_config));

    for (i, ws) in config.workspaces.iter().enumerate() {
        if i == 0 {
            tracing::info!(workspace = %ws.display_name, acp_server = %ws.acp_server_name, "default workspace selected");
        } else {
            tracing::info!(workspace = %ws.display_name, acp_server = %ws.acp_server_name, "configured workspace available");
        }
    }

    loom_gateway::serve::serve(bind, &token_path, manager).await
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("loom/sessions")
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry().with(filter).with(fmt::layer()).try_init();
}
