// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! JSON API handlers.
//!
//! ```text
//! POST /api/login     {password, operator?}            → {token, expires_at}
//! POST /api/logout    Authorization: Bearer <token>    → 204
//! GET  /api/commands  Authorization: Bearer <token>    → [descriptor…]
//! POST /api/dispatch  {command, args?, confirm?, password?, operator?}
//!                     Bearer token, or `password` for a one-shot login
//! GET  /api/health                                     → {status: "ok"}
//! ```
//!
//! `args` is either a list (positional) or an object (named). Every failure
//! answers `{"error": {"kind", "message"}}` with the status below.
//!
//! | error                   | status |
//! |-------------------------|--------|
//! | `unauthorized`          | 401    |
//! | `rate_limited`          | 429 + `Retry-After` |
//! | `unknown_command`       | 404    |
//! | `confirmation_required` | 409    |
//! | `invalid_arguments`     | 400    |
//! | `timeout`               | 504    |
//! | `internal_error`        | 500    |
//! | `not_configured`        | 503    |

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use pcgate_config::OperatorId;
use pcgate_core::{
    ArgValues, Caller, ClientId, DispatchError, DispatchRequest, DispatchResult, Dispatcher,
    Secret, Session, SessionToken, WebCredential,
};

// ── Request bodies ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub password: String,
    #[serde(default)]
    pub operator: Option<OperatorId>,
}

#[derive(Debug, Deserialize)]
pub struct DispatchBody {
    pub command: String,
    #[serde(default)]
    pub args: ArgValues,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub operator: Option<OperatorId>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A dispatch error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(e: &DispatchError) -> StatusCode {
    match e {
        DispatchError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Unauthorized => StatusCode::UNAUTHORIZED,
        DispatchError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        DispatchError::UnknownCommand { .. } => StatusCode::NOT_FOUND,
        DispatchError::ConfirmationRequired { .. } => StatusCode::CONFLICT,
        DispatchError::InvalidArguments { .. } => StatusCode::BAD_REQUEST,
        DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(e: &DispatchError) -> Value {
    json!({ "error": { "kind": e.code(), "message": e.to_string() } })
}

fn with_retry_after(mut resp: Response, e: &DispatchError) -> Response {
    if let DispatchError::RateLimited { retry_after_secs } = e {
        resp.headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
    }
    resp
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let resp = (status_for(&self.0), Json(error_body(&self.0))).into_response();
        with_retry_after(resp, &self.0)
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn login(
    State(dispatcher): State<Dispatcher>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    let result = dispatcher.login(ClientId::from(peer.ip()), Secret::new(body.password), body.operator);
    result.outcome?;
    let session = result.issued_session.ok_or(DispatchError::InternalError)?;
    Ok(Json(session_json(&session)))
}

pub async fn logout(
    State(dispatcher): State<Dispatcher>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer(&headers).ok_or(DispatchError::Unauthorized)?;
    if dispatcher.gate().revoke(&token) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(DispatchError::Unauthorized.into())
    }
}

pub async fn commands(
    State(dispatcher): State<Dispatcher>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token = bearer(&headers).ok_or(DispatchError::Unauthorized)?;
    dispatcher.check_session(&token)?;
    let list: Vec<Value> = dispatcher
        .registry()
        .descriptors()
        .into_iter()
        .map(|d| {
            json!({
                "name": d.name,
                "usage": d.usage(),
                "summary": d.summary,
                "risk": d.risk,
                "subsystem": d.subsystem,
                "args": d.args,
            })
        })
        .collect();
    Ok(Json(Value::Array(list)))
}

pub async fn dispatch(
    State(dispatcher): State<Dispatcher>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<DispatchBody>,
) -> Response {
    let credential = match (bearer(&headers), body.password) {
        (Some(token), _) => WebCredential::Session(token),
        (None, Some(password)) => WebCredential::Password {
            client: ClientId::from(peer.ip()),
            password: Secret::new(password),
            operator: body.operator,
        },
        // Goes through the dispatcher anyway so the attempt is audited.
        (None, None) => WebCredential::Session(SessionToken::presented(String::new())),
    };
    let request = DispatchRequest::new(Caller::Web(credential), body.command, body.args)
        .confirm(body.confirm);
    render(dispatcher.handle(request).await)
}

/// Success and failure both carry the request id and any freshly issued
/// session.
fn render(result: DispatchResult) -> Response {
    let mut body = match &result.outcome {
        Ok(payload) => json!({ "result": payload }),
        Err(e) => error_body(e),
    };
    body["request_id"] = json!(result.audit.request_id);
    if let Some(session) = &result.issued_session {
        body["session"] = session_json(session);
    }
    match &result.outcome {
        Ok(_) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => with_retry_after((status_for(e), Json(body)).into_response(), e),
    }
}

fn session_json(session: &Session) -> Value {
    json!({
        "token": session.token.expose(),
        "expires_at": session.record.expires_at,
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn bearer(headers: &HeaderMap) -> Option<SessionToken> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = auth.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| SessionToken::presented(token))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        let mut h = HeaderMap::new();
        assert!(bearer(&h).is_none());
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer(&h).is_none());
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer(&h).is_none());
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok123"));
        assert_eq!(bearer(&h).unwrap().expose(), "tok123");
    }

    #[test]
    fn every_error_has_a_distinct_status() {
        let errors = [
            DispatchError::NotConfigured,
            DispatchError::Unauthorized,
            DispatchError::RateLimited { retry_after_secs: 1 },
            DispatchError::UnknownCommand { name: "x".into() },
            DispatchError::ConfirmationRequired { command: "x".into() },
            DispatchError::InvalidArguments { reason: "x".into() },
            DispatchError::Timeout,
            DispatchError::InternalError,
        ];
        let statuses: std::collections::HashSet<u16> =
            errors.iter().map(|e| status_for(e).as_u16()).collect();
        assert_eq!(statuses.len(), errors.len());
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let resp = ApiError(DispatchError::RateLimited { retry_after_secs: 42 }).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn args_accept_list_or_object() {
        let b: DispatchBody = serde_json::from_str(r#"{"command":"ls","args":["/tmp"]}"#).unwrap();
        assert_eq!(b.args, ArgValues::Positional(vec!["/tmp".into()]));
        let b: DispatchBody =
            serde_json::from_str(r#"{"command":"ls","args":{"path":"/tmp"}}"#).unwrap();
        assert!(matches!(b.args, ArgValues::Named(_)));
        let b: DispatchBody = serde_json::from_str(r#"{"command":"ls"}"#).unwrap();
        assert_eq!(b.args, ArgValues::default());
        assert!(!b.confirm);
    }
}
