// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Gateway startup — assembles the router and starts the HTTP/WebSocket
//! server. Unlike the teacher's gateway, there is no P2P transport or chat
//! integration to start first: the only collaborators are the bearer
//! token and the session registry.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use loom_session::SessionManager;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{bearer_auth_mw, AuthState};
use crate::security::{csrf_guard, security_headers};
use crate::token::StoredTokenFile;
use crate::ws::ws_handler;
use crate::AppState;

pub fn default_token_path() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config/loom/token.yaml")
}

/// Loads (or generates and prints once) the bearer token, builds the
/// router, and serves it. Blocks until the process is terminated.
pub async fn serve(bind: SocketAddr, token_path: &Path, manager: Arc<SessionManager>) -> anyhow::Result<()> {
    let (token_hash, raw) = StoredTokenFile::load_or_generate(token_path)?;
    if let Some(raw) = raw {
        info!("=======================================================");
        info!("Gateway bearer token (shown once — save it now!):");
        info!("  {}", raw.as_str());
        info!("=======================================================");
    }

    let state = AppState { auth: AuthState::with_defaults(token_hash), manager };
    let app = router(state);

    info!(%bind, "starting HTTP gateway");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:session_id", get(ws_handler))
        .layer(axum::middleware::from_fn_with_state(state.clone(), bearer_auth_mw::<AppState>))
        .layer(axum::middleware::from_fn(csrf_guard))
        .layer(axum::middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_token_path_lives_under_loom_config_dir() {
        let path = default_token_path();
        assert!(path.ends_with(".config/loom/token.yaml"));
    }
}
