// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Response hardening and cross-origin protection for the web API.
//!
//! # Headers applied to every response
//!
//! | Header                         | Value                             |
//! |--------------------------------|-----------------------------------|
//! | `X-Content-Type-Options`       | `nosniff`                         |
//! | `X-Frame-Options`              | `DENY`                            |
//! | `Referrer-Policy`              | `no-referrer`                     |
//! | `Cache-Control`                | `no-store`                        |
//! | `Content-Security-Policy`      | `default-src 'none'`              |
//!
//! The API serves JSON only, so the CSP forbids everything and responses
//! (which may carry session tokens) are never cached.
//!
//! # Cross-origin guard
//!
//! A browser page on another origin must not be able to drive a logged-in
//! operator's session. Mutating requests are rejected when
//! `Sec-Fetch-Site` says `cross-site`, or failing that when `Origin` or
//! `Referer` point somewhere other than loopback or the request's own host.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

// ── Constant header values ────────────────────────────────────────────────────

static NO_SNIFF: HeaderValue = HeaderValue::from_static("nosniff");
static DENY_FRAME: HeaderValue = HeaderValue::from_static("DENY");
static NO_REFERRER: HeaderValue = HeaderValue::from_static("no-referrer");
static NO_STORE: HeaderValue = HeaderValue::from_static("no-store");
static CSP: HeaderValue =
    HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'; base-uri 'none'");

// ── Middleware ────────────────────────────────────────────────────────────────

pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let h = resp.headers_mut();
    h.insert(header::X_CONTENT_TYPE_OPTIONS, NO_SNIFF.clone());
    h.insert(header::X_FRAME_OPTIONS, DENY_FRAME.clone());
    h.insert(header::REFERRER_POLICY, NO_REFERRER.clone());
    h.insert(header::CACHE_CONTROL, NO_STORE.clone());
    h.insert(header::CONTENT_SECURITY_POLICY, CSP.clone());
    resp
}

/// Reject cross-origin POST/PUT/PATCH/DELETE.
pub async fn csrf_guard(req: Request, next: Next) -> Response {
    if is_mutating_method(req.method()) {
        if let Some(reason) = should_reject_cross_origin(req.headers()) {
            warn!(path = %req.uri().path(), reason, "cross-origin request rejected");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": { "kind": "forbidden", "message": reason } })),
            )
                .into_response();
        }
    }
    next.run(req).await
}

// ── Internal logic ────────────────────────────────────────────────────────────

fn is_mutating_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn should_reject_cross_origin(headers: &HeaderMap) -> Option<&'static str> {
    if let Some(sfs) = headers.get("sec-fetch-site").and_then(|v| v.to_str().ok()) {
        if sfs.eq_ignore_ascii_case("cross-site") {
            return Some("cross-site request");
        }
        return None;
    }

    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());

    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        if !is_trusted_origin(origin, host) {
            return Some("cross-origin request");
        }
        return None;
    }

    if let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) {
        if !is_trusted_origin(referer, host) {
            return Some("cross-origin referer");
        }
    }

    // No browser headers at all: curl, scripts, native clients.
    None
}

/// Loopback, or the same authority the request was sent to.
fn is_trusted_origin(url: &str, host: Option<&str>) -> bool {
    let Some(authority) = authority(url) else { return false };
    let hostname = authority
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(h, _)| h)
        .unwrap_or(authority);
    if matches!(hostname, "localhost" | "[::1]") || hostname.starts_with("127.") {
        return true;
    }
    host.is_some_and(|h| h.eq_ignore_ascii_case(authority))
}

fn authority(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let auth = &rest[..end];
    (!auth.is_empty() && !auth.contains('@')).then_some(auth)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use axum::http::HeaderName;

    use super::*;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut m = HeaderMap::new();
        for (k, v) in pairs {
            m.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        m
    }

    #[test]
    fn cross_site_sec_fetch_site_is_rejected() {
        let h = headers_with(&[("sec-fetch-site", "cross-site")]);
        assert!(should_reject_cross_origin(&h).is_some());
    }

    #[test]
    fn same_origin_sec_fetch_site_is_allowed() {
        let h = headers_with(&[("sec-fetch-site", "same-origin")]);
        assert!(should_reject_cross_origin(&h).is_none());
    }

    #[test]
    fn foreign_origin_is_rejected() {
        let h = headers_with(&[("origin", "https://evil.com"), ("host", "127.0.0.1:5000")]);
        assert!(should_reject_cross_origin(&h).is_some());
    }

    #[test]
    fn lookalike_loopback_origin_is_rejected() {
        let h = headers_with(&[("origin", "https://localhost.evil.com")]);
        assert!(should_reject_cross_origin(&h).is_some());
        let h = headers_with(&[("origin", "https://127.0.0.1@evil.com")]);
        assert!(should_reject_cross_origin(&h).is_some());
    }

    #[test]
    fn loopback_and_same_host_origins_are_allowed() {
        let h = headers_with(&[("origin", "http://localhost:5000")]);
        assert!(should_reject_cross_origin(&h).is_none());
        let h = headers_with(&[("origin", "http://127.0.0.1:5000")]);
        assert!(should_reject_cross_origin(&h).is_none());
        let h = headers_with(&[("origin", "http://pc.lan:5000"), ("host", "pc.lan:5000")]);
        assert!(should_reject_cross_origin(&h).is_none());
    }

    #[test]
    fn foreign_referer_is_rejected() {
        let h = headers_with(&[("referer", "https://evil.com/page")]);
        assert!(should_reject_cross_origin(&h).is_some());
    }

    #[test]
    fn no_origin_no_referer_is_allowed() {
        assert!(should_reject_cross_origin(&HeaderMap::new()).is_none());
    }

    #[test]
    fn mutating_methods() {
        assert!(is_mutating_method(&Method::POST));
        assert!(is_mutating_method(&Method::DELETE));
        assert!(!is_mutating_method(&Method::GET));
        assert!(!is_mutating_method(&Method::OPTIONS));
    }
}
