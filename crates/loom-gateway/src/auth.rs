// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! HTTP bearer-token authentication middleware and per-IP rate limiting.
//!
//! # Token authentication
//!
//! All HTTP/WebSocket requests must carry:
//! ```text
//! Authorization: Bearer <token>
//! ```
//! The raw token is never stored; only its SHA-256 hash lives on disk (see
//! [`crate::token`]), and comparison is constant-time via
//! [`subtle::ConstantTimeEq`] to avoid a timing oracle on the hash compare.
//!
//! # Rate limiting
//!
//! Failed attempts are rate-limited per IP using `governor`'s GCRA
//! algorithm — successful requests are never throttled, only the failures
//! that precede them. Loopback addresses are exempt, since a process with
//! loopback access already has local access to the machine.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use tracing::warn;

use crate::token::StoredToken;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct AuthState {
    token_hash: Arc<StoredToken>,
    limiter: Arc<IpLimiter>,
}

impl AuthState {
    pub fn new(token_hash: StoredToken, max_per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(max_per_minute).expect("max_per_minute must be > 0"))
            .allow_burst(NonZeroU32::new(burst).expect("burst must be > 0"));
        Self { token_hash: Arc::new(token_hash), limiter: Arc::new(RateLimiter::keyed(quota)) }
    }

    pub fn with_defaults(token_hash: StoredToken) -> Self {
        Self::new(token_hash, 5, 2)
    }
}

pub trait AsAuthState {
    fn auth_state(&self) -> &AuthState;
}

pub async fn bearer_auth_mw<S>(
    State(state): State<S>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response
where
    S: AsAuthState + Clone + Send + Sync + 'static,
{
    verify_bearer(state.auth_state(), addr.ip(), req, next).await
}

/// Rate limiting is applied only to failed attempts, so legitimate clients
/// are never throttled by their own traffic.
pub async fn verify_bearer(auth: &AuthState, ip: IpAddr, req: Request, next: Next) -> Response {
    match extract_bearer(req.headers()) {
        Some(token) if auth.token_hash.verify(token) => next.run(req).await,
        _ => {
            if !is_loopback(ip) && auth.limiter.check_key(&ip).is_err() {
                warn!(%ip, "rate limit exceeded after repeated auth failures");
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(axum::http::header::RETRY_AFTER, "60")],
                    "Too Many Requests",
                )
                    .into_response();
            }
            warn!(%ip, "authentication failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}
