// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod auth;
pub mod error;
pub mod protocol;
pub mod security;
pub mod serve;
pub mod token;
pub mod ws;

use std::sync::Arc;

use axum::extract::FromRef;
use loom_session::SessionManager;

pub use error::{GatewayError, Result};

/// Combined axum router state: auth policy plus the session registry.
/// `ws_handler` pulls its `Arc<SessionManager>` substate via [`FromRef`];
/// `bearer_auth_mw` reaches the auth substate via [`auth::AsAuthState`].
#[derive(Clone)]
pub struct AppState {
    pub auth: auth::AuthState,
    pub manager: Arc<SessionManager>,
}

impl auth::AsAuthState for AppState {
    fn auth_state(&self) -> &auth::AuthState {
        &self.auth
    }
}

impl FromRef<AppState> for Arc<SessionManager> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.manager)
    }
}
