// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Runtime settings loaded from YAML.
//!
//! Settings describe *how* the node behaves (timeouts, rate limits, bind
//! addresses). Secrets never live here; they belong to the persisted
//! [`crate::ConfigRecord`].
//!
//! **All defaults are safe.** With no settings file at all the web API binds
//! to loopback, the allow-list is deny-by-default and chat password
//! enrollment is off.
//!
//! # Example
//! ```yaml
//! record_path: "~/.config/pcgate/config.json"
//! auth:
//!   session_ttl_secs: 1800
//!   max_failed_attempts: 5
//!   failure_window_secs: 60
//!   owner_id: 123456789
//!   web_identity: password_and_allow_list
//! dispatch:
//!   timeout_secs: 20
//! web:
//!   bind: "127.0.0.1:5000"
//! chat:
//!   enabled: true
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::record::OperatorId;

fn default_true() -> bool {
    true
}
fn default_record_path() -> String {
    "~/.config/pcgate/config.json".to_string()
}
fn default_secrets_file() -> String {
    ".env".to_string()
}
fn default_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Location of the persisted configuration record (`~` is expanded).
    #[serde(default = "default_record_path")]
    pub record_path: String,
    /// Dotenv-style file consulted for the bot credential.
    #[serde(default = "default_secrets_file")]
    pub secrets_file: String,
    /// Environment variable that overrides every other credential source.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub web: WebSettings,
    #[serde(default)]
    pub chat: ChatSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            record_path: default_record_path(),
            secrets_file: default_secrets_file(),
            token_env: default_token_env(),
            auth: AuthSettings::default(),
            dispatch: DispatchSettings::default(),
            web: WebSettings::default(),
            chat: ChatSettings::default(),
        }
    }
}

impl Settings {
    pub fn record_path(&self) -> PathBuf {
        expand(&self.record_path)
    }

    pub fn secrets_file(&self) -> PathBuf {
        expand(&self.secrets_file)
    }
}

fn expand(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).into_owned())
}

/// How web-origin requests are tied to operator identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebIdentityPolicy {
    /// The shared password alone grants a web session.
    #[default]
    PasswordOnly,
    /// Web logins must also name an operator on the allow-list, and the
    /// membership is re-checked on every request.
    PasswordAndAllowList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Credentials shorter than this are rejected before use or persistence.
    #[serde(default = "default_min_credential_len")]
    pub min_credential_len: usize,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Failed password attempts tolerated per client inside one window.
    #[serde(default = "default_max_failed")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_failure_window")]
    pub failure_window_secs: u64,
    /// Bootstrap identity that is always allowed, even with an empty list.
    #[serde(default)]
    pub owner_id: Option<OperatorId>,
    #[serde(default)]
    pub web_identity: WebIdentityPolicy,
    /// Allow chat users to join the allow-list with `/auth <password>`.
    #[serde(default)]
    pub chat_enrollment: bool,
}

fn default_min_credential_len() -> usize {
    10
}
fn default_min_password_len() -> usize {
    8
}
fn default_session_ttl() -> u64 {
    3600
}
fn default_max_failed() -> u32 {
    5
}
fn default_failure_window() -> u64 {
    60
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            min_credential_len: default_min_credential_len(),
            min_password_len: default_min_password_len(),
            session_ttl_secs: default_session_ttl(),
            max_failed_attempts: default_max_failed(),
            failure_window_secs: default_failure_window(),
            owner_id: None,
            web_identity: WebIdentityPolicy::default(),
            chat_enrollment: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Upper bound on a single subsystem invocation.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self { timeout_secs: default_timeout() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `host:port`. Default: `127.0.0.1:5000` (loopback only).
    #[serde(default = "default_web_bind")]
    pub bind: String,
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_web_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_max_body() -> usize {
    1024 * 1024
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_web_bind(),
            max_body_bytes: default_max_body(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_poll_timeout() -> u64 {
    30
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
