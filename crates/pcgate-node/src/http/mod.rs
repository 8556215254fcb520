// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Web front-end: an axum JSON API in front of the dispatcher.
//!
//! # Layer order (outermost first)
//!
//! ```text
//! security_headers → csrf_guard → body limit → routes
//! ```
//!
//! The client identity used for password rate limiting is the peer IP
//! from `ConnectInfo`, so the server must be started through [`serve`] (or
//! a router with `MockConnectInfo` in tests).

pub mod api;
pub mod security;

use std::{future::Future, net::SocketAddr};

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use pcgate_config::WebSettings;
use pcgate_core::Dispatcher;

pub fn router(dispatcher: Dispatcher, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/login", post(api::login))
        .route("/api/logout", post(api::logout))
        .route("/api/commands", get(api::commands))
        .route("/api/dispatch", post(api::dispatch))
        .with_state(dispatcher)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::from_fn(security::csrf_guard))
        .layer(middleware::from_fn(security::security_headers))
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    dispatcher: Dispatcher,
    settings: &WebSettings,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("binding web front-end to {}", settings.bind))?;
    let local = listener.local_addr()?;
    if !local.ip().is_loopback() {
        tracing::warn!(%local, "web front-end is reachable from the network");
    }
    info!(%local, "web front-end listening");

    let app = router(dispatcher, settings.max_body_bytes);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .context("web front-end failed")?;
    info!("web front-end stopped");
    Ok(())
}
