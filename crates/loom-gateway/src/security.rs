// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Security headers and CSRF protection middleware, applied to every route.
//!
//! HSTS is set even though the gateway defaults to loopback-only binding —
//! if the operator later exposes it over LAN the header is already there.
//! WebSocket upgrade requests are exempt from the CSRF check since browsers
//! already enforce same-origin for WebSocket connections.

use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

static HSTS: HeaderValue = HeaderValue::from_static("max-age=31536000; includeSubDomains");
static NO_SNIFF: HeaderValue = HeaderValue::from_static("nosniff");
static DENY_FRAME: HeaderValue = HeaderValue::from_static("DENY");
static NO_REFERRER: HeaderValue = HeaderValue::from_static("no-referrer");
static PERMISSIONS: HeaderValue = HeaderValue::from_static("camera=(), microphone=(), geolocation=()");
static CSP: HeaderValue = HeaderValue::from_static(
    "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
     img-src 'self' data:; connect-src 'self' wss: ws:; frame-ancestors 'none'; \
     base-uri 'none'; object-src 'none'",
);

pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let h = resp.headers_mut();
    h.insert(axum::http::header::STRICT_TRANSPORT_SECURITY, HSTS.clone());
    h.insert(axum::http::header::X_CONTENT_TYPE_OPTIONS, NO_SNIFF.clone());
    h.insert(axum::http::header::X_FRAME_OPTIONS, DENY_FRAME.clone());
    h.insert(axum::http::header::REFERRER_POLICY, NO_REFERRER.clone());
    h.insert("permissions-policy", PERMISSIONS.clone());
    h.insert(axum::http::header::CONTENT_SECURITY_POLICY, CSP.clone());
    resp
}

pub async fn csrf_guard(req: Request, next: Next) -> Response {
    let is_ws_upgrade = req
        .headers()
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade && is_mutating_method(req.method()) {
        if let Some(reason) = should_reject_cross_origin(req.headers()) {
            return (StatusCode::FORBIDDEN, reason).into_response();
        }
    }
    next.run(req).await
}

fn is_mutating_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn should_reject_cross_origin(headers: &axum::http::HeaderMap) -> Option<&'static str> {
    if let Some(sfs) = headers.get("sec-fetch-site").and_then(|v| v.to_str().ok()) {
        return if sfs.eq_ignore_ascii_case("cross-site") { Some("Forbidden: cross-site request") } else { None };
    }
    if let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) {
        return if is_loopback_origin(origin) { None } else { Some("Forbidden: cross-origin request") };
    }
    if let Some(referer) = headers.get(axum::http::header::REFERER).and_then(|v| v.to_str().ok()) {
        if !is_loopback_origin(referer) {
            return Some("Forbidden: cross-origin referer");
        }
    }
    None
}

fn is_loopback_origin(url: &str) -> bool {
    url.contains("localhost") || url.contains("127.0.0.") || url.contains("[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut m = HeaderMap::new();
        for (k, v) in pairs {
            m.insert(axum::http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        m
    }

    #[test]
    fn cross_site_sec_fetch_site_is_rejected() {
        assert!(should_reject_cross_origin(&headers_with(&[("sec-fetch-site", "cross-site")])).is_some());
    }

    #[test]
    fn same_origin_sec_fetch_site_is_allowed() {
        assert!(should_reject_cross_origin(&headers_with(&[("sec-fetch-site", "same-origin")])).is_none());
    }

    #[test]
    fn loopback_ip_origin_is_allowed() {
        assert!(should_reject_cross_origin(&headers_with(&[("origin", "http://127.0.0.1:7890")])).is_none());
    }

    #[test]
    fn cross_origin_header_is_rejected() {
        assert!(should_reject_cross_origin(&headers_with(&[("origin", "https://evil.com")])).is_some());
    }

    #[test]
    fn no_origin_no_referer_is_allowed() {
        assert!(should_reject_cross_origin(&HeaderMap::new()).is_none());
    }

    #[test]
    fn get_is_not_mutating() {
        assert!(!is_mutating_method(&Method::GET));
    }
}
