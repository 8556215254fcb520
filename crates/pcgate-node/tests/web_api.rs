// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP-level tests of the web front-end, driven through `tower::ServiceExt`.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use pcgate_config::{AuthSettings, ConfigRecord, ConfigStore, OperatorId, WebIdentityPolicy};
use pcgate_core::{
    AllowList, ArgKind, ArgSpec, AuditSink, Clock, CommandDescriptor, Dispatcher, Invocation,
    MemoryAuditSink, Payload, RegistryBuilder, RiskClass, SessionGate, Subsystem,
    SubsystemManager, SystemClock,
};
use pcgate_node::http::router;

const PASSWORD: &str = "correct-horse";

struct Stub {
    calls: AtomicUsize,
}

#[async_trait]
impl SubsystemManager for Stub {
    fn subsystem(&self) -> Subsystem {
        Subsystem::File
    }

    async fn invoke(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Payload::json(json!({
            "command": inv.command,
            "path": inv.args.get("path"),
        })))
    }
}

struct Harness {
    app: Router,
    stub: Arc<Stub>,
    audit: Arc<MemoryAuditSink>,
}

fn harness(policy: WebIdentityPolicy) -> Harness {
    let mut b = RegistryBuilder::new();
    b.register(
        CommandDescriptor::new("ls", Subsystem::File, RiskClass::ReadOnly, "List")
            .arg(ArgSpec::optional("path", ArgKind::Path)),
    )
    .unwrap()
    .register(
        CommandDescriptor::new("delete", Subsystem::File, RiskClass::Destructive, "Delete")
            .arg(ArgSpec::required("path", ArgKind::Path)),
    )
    .unwrap();

    let config = Arc::new(ConfigStore::in_memory(ConfigRecord {
        password: PASSWORD.into(),
        allowed_user_ids: [OperatorId::Numeric(7)].into(),
        ..Default::default()
    }));
    let gate = Arc::new(SessionGate::new(
        config.clone(),
        Arc::new(SystemClock) as Arc<dyn Clock>,
        &AuthSettings::default(),
    ));
    let stub = Arc::new(Stub { calls: AtomicUsize::new(0) });
    let audit = Arc::new(MemoryAuditSink::new());
    let dispatcher = Dispatcher::builder(
        b.build(),
        AllowList::new(config, None),
        gate,
        audit.clone() as Arc<dyn AuditSink>,
    )
    .manager(stub.clone() as Arc<dyn SubsystemManager>)
    .web_identity(policy)
    .build()
    .unwrap();

    let peer: SocketAddr = "198.51.100.4:40000".parse().unwrap();
    let app = router(dispatcher, 64 * 1024).layer(MockConnectInfo(peer));
    Harness { app, stub, audit }
}

fn post(uri: &str, body: Value, bearer: Option<&str>) -> Request<Body> {
    let mut req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = body.to_string();
    req.header(header::CONTENT_LENGTH, body.len()).body(Body::from(body)).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    // Framework rejections (body too large) are plain text.
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

async fn login(app: &Router) -> String {
    let (status, _, body) = send(app, post("/api/login", json!({ "password": PASSWORD }), None)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn login_then_dispatch_with_bearer() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    let token = login(&h.app).await;
    assert_eq!(token.len(), 43);

    let (status, headers, body) = send(
        &h.app,
        post("/api/dispatch", json!({ "command": "ls", "args": ["/tmp"] }), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["result"]["value"]["path"], "/tmp");
    assert!(body["request_id"].is_string());
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn named_args_are_accepted() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    let token = login(&h.app).await;
    let (status, _, body) = send(
        &h.app,
        post("/api/dispatch", json!({ "command": "ls", "args": { "path": "/srv" } }), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["value"]["path"], "/srv");
}

#[tokio::test]
async fn wrong_password_is_401_and_sixth_attempt_is_429() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    for _ in 0..5 {
        let (status, _, body) =
            send(&h.app, post("/api/login", json!({ "password": "nope-nope" }), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["kind"], "unauthorized");
    }
    let (status, headers, _) =
        send(&h.app, post("/api/login", json!({ "password": PASSWORD }), None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn unauthenticated_caller_cannot_probe_commands() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    for command in ["ls", "no-such-command"] {
        let (status, _, body) =
            send(&h.app, post("/api/dispatch", json!({ "command": command }), Some("bogus"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "access denied");
    }
    let (status, _, _) = send(&h.app, post("/api/dispatch", json!({ "command": "ls" }), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::get("/api/commands").body(Body::empty()).unwrap();
    let (status, _, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.stub.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.audit.len(), 3);
}

#[tokio::test]
async fn status_mapping_for_authorized_errors() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    let token = login(&h.app).await;

    let (status, _, _) =
        send(&h.app, post("/api/dispatch", json!({ "command": "nope" }), Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) =
        send(&h.app, post("/api/dispatch", json!({ "command": "delete" }), Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_arguments");

    let (status, _, body) = send(
        &h.app,
        post("/api/dispatch", json!({ "command": "delete", "args": ["/x"] }), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "confirmation_required");
    assert_eq!(h.stub.calls.load(Ordering::SeqCst), 0);

    let (status, _, _) = send(
        &h.app,
        post(
            "/api/dispatch",
            json!({ "command": "delete", "args": ["/x"], "confirm": true }),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.stub.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_shot_password_dispatch_returns_session() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    let (status, _, body) = send(
        &h.app,
        post("/api/dispatch", json!({ "command": "ls", "password": PASSWORD }), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["session"]["token"].as_str().unwrap().to_string();

    let req = Request::get("/api/commands")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body.as_array().unwrap().iter().filter_map(|d| d["name"].as_str()).collect();
    assert_eq!(names, ["delete", "ls"]);
}

#[tokio::test]
async fn logout_ends_session() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    let token = login(&h.app).await;
    let (status, _, _) = send(&h.app, post("/api/logout", json!({}), Some(&token))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&h.app, post("/api/logout", json!({}), Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) =
        send(&h.app, post("/api/dispatch", json!({ "command": "ls" }), Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn allow_list_policy_requires_listed_operator() {
    let h = harness(WebIdentityPolicy::PasswordAndAllowList);
    let (status, _, _) =
        send(&h.app, post("/api/login", json!({ "password": PASSWORD }), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = send(
        &h.app,
        post("/api/login", json!({ "password": PASSWORD, "operator": 8 }), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = send(
        &h.app,
        post("/api/login", json!({ "password": PASSWORD, "operator": 7 }), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cross_site_post_is_forbidden() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    let mut req = post("/api/login", json!({ "password": PASSWORD }), None);
    req.headers_mut().insert("sec-fetch-site", "cross-site".parse().unwrap());
    let (status, headers, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = harness(WebIdentityPolicy::PasswordOnly);
    let big = "x".repeat(128 * 1024);
    let (status, _, _) = send(
        &h.app,
        post("/api/login", json!({ "password": big }), None),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
