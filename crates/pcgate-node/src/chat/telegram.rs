// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Minimal Telegram Bot API client: `getUpdates` long polling,
//! `sendMessage` and `deleteMessage`.
//!
//! The bot credential is part of every request URL, so transport errors are
//! stripped of their URL before they are returned or logged.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use thiserror::Error;

use pcgate_core::Credential;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("transport: {0}")]
    Transport(reqwest::Error),

    #[error("bot api error {code}: {description}")]
    Api { code: i64, description: String },
}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        TelegramError::Transport(e.without_url())
    }
}

impl TelegramError {
    /// 401/404 from the Bot API mean the token itself is bad.
    pub fn is_credential_rejected(&self) -> bool {
        matches!(self, TelegramError::Api { code: 401 | 404, .. })
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    /// `<api_base>/bot<token>`; never logged.
    endpoint: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient").finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// `poll_timeout` is the `getUpdates` long-poll time; the HTTP timeout
    /// is set comfortably above it.
    pub fn new(api_base: &str, credential: &Credential, poll_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("building Telegram HTTP client: {}", e.without_url()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), credential.expose()),
        })
    }

    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut body = json!({ "timeout": timeout_secs, "allowed_updates": ["message"] });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", &body).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let body = json!({ "chat_id": chat_id, "text": text, "disable_web_page_preview": true });
        self.call::<serde_json::Value>("sendMessage", &body).await.map(|_| ())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        self.call::<serde_json::Value>("deleteMessage", &body).await.map(|_| ())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, TelegramError> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.endpoint))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let parsed: ApiResponse<T> = resp.json().await?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api {
                code: parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: parsed.description.unwrap_or_else(|| "no description".into()),
            }),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
