// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Bot credential resolution.
//!
//! # Precedence
//!
//! ```text
//! 1. environment variable      (TELEGRAM_BOT_TOKEN by default)
//! 2. secrets file              (.env, line TELEGRAM_BOT_TOKEN=...)
//! 3. persisted config record   (telegram_token)
//! 4. interactive prompt        (attended runs only, see crate::bootstrap)
//! ```
//!
//! The first source that yields a value passing [`CredentialStore::validate_shape`]
//! wins. Resolution happens once per process: later calls return the cached
//! credential and never prompt again.
//!
//! The shape check is a cheap sanity filter (length, no whitespace). It says
//! nothing about whether the chat platform will accept the token.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use pcgate_config::ConfigStore;

use crate::{bootstrap::Prompter, secret::Secret};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Environment,
    SecretsFile,
    PersistedConfig,
    Interactive,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Environment => "environment",
            CredentialSource::SecretsFile => "secrets file",
            CredentialSource::PersistedConfig => "persisted config",
            CredentialSource::Interactive => "interactive",
        })
    }
}

/// The bot credential for this process. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    secret: Secret,
    source: CredentialSource,
    resolved_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(value: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            secret: Secret::new(value),
            source,
            resolved_at: Utc::now(),
        }
    }

    /// The raw token. Only the chat transport should call this.
    pub fn expose(&self) -> &str {
        self.secret.expose()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no bot credential configured")]
    NotConfigured,

    #[error("credential rejected: {0}")]
    InvalidShape(String),

    #[error("persisting credential: {0:#}")]
    Persist(anyhow::Error),

    #[error("interactive prompt failed: {0:#}")]
    Prompt(anyhow::Error),
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct CredentialStore {
    config: Arc<ConfigStore>,
    env_var: String,
    secrets_file: Option<PathBuf>,
    min_len: usize,
    env_lookup: EnvLookup,
    resolved: Mutex<Option<Credential>>,
}

impl CredentialStore {
    pub fn new(config: Arc<ConfigStore>, env_var: impl Into<String>, min_len: usize) -> Self {
        Self {
            config,
            env_var: env_var.into(),
            secrets_file: None,
            min_len,
            env_lookup: Arc::new(|name| std::env::var(name).ok()),
            resolved: Mutex::new(None),
        }
    }

    pub fn with_secrets_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_file = Some(path.into());
        self
    }

    /// Replace the process-environment lookup (tests inject a fixed map).
    pub fn with_env_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.env_lookup = Arc::new(lookup);
        self
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }

    /// Cheap plausibility check: long enough and free of whitespace.
    pub fn validate_shape(&self, candidate: &str) -> bool {
        candidate.len() >= self.min_len && !candidate.chars().any(char::is_whitespace)
    }

    /// Resolve the credential, prompting through `prompter` only when no
    /// other source has one. Pass `None` for unattended runs.
    ///
    /// Idempotent: the first success is cached for the life of the store.
    pub fn resolve(&self, prompter: Option<&dyn Prompter>) -> Result<Credential, CredentialError> {
        let mut slot = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cred) = slot.as_ref() {
            return Ok(cred.clone());
        }

        let cred = match self.resolve_unattended() {
            Some(cred) => cred,
            None => match prompter {
                Some(p) => crate::bootstrap::run_attended(self, p)?,
                None => return Err(CredentialError::NotConfigured),
            },
        };

        info!(source = %cred.source(), "bot credential resolved");
        *slot = Some(cred.clone());
        Ok(cred)
    }

    /// The credential resolved earlier, if any.
    pub fn current(&self) -> Option<Credential> {
        self.resolved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Write `credential` into the persisted record (atomic replace).
    pub fn persist(&self, credential: &Credential) -> Result<(), CredentialError> {
        if !self.validate_shape(credential.expose()) {
            return Err(CredentialError::InvalidShape(format!(
                "must be at least {} characters without whitespace",
                self.min_len
            )));
        }
        let value = credential.expose().to_string();
        self.config
            .update(move |r| r.telegram_token = value)
            .map_err(CredentialError::Persist)?;
        info!("bot credential persisted to configuration record");
        Ok(())
    }

    fn resolve_unattended(&self) -> Option<Credential> {
        self.from_environment()
            .or_else(|| self.from_secrets_file())
            .or_else(|| self.from_persisted())
    }

    fn from_environment(&self) -> Option<Credential> {
        let value = (self.env_lookup)(&self.env_var)?;
        self.accept(value.trim(), CredentialSource::Environment)
    }

    fn from_secrets_file(&self) -> Option<Credential> {
        let path = self.secrets_file.as_deref()?;
        match read_dotenv_value(path, &self.env_var) {
            Ok(Some(value)) => self.accept(&value, CredentialSource::SecretsFile),
            Ok(None) => None,
            Err(e) => {
                warn!(path = %path.display(), "could not read secrets file: {e:#}");
                None
            }
        }
    }

    fn from_persisted(&self) -> Option<Credential> {
        let record = self.config.snapshot();
        self.accept(record.telegram_token.trim(), CredentialSource::PersistedConfig)
    }

    fn accept(&self, value: &str, source: CredentialSource) -> Option<Credential> {
        if value.is_empty() {
            return None;
        }
        if !self.validate_shape(value) {
            warn!(%source, "ignoring malformed bot credential");
            return None;
        }
        debug!(%source, "credential source matched");
        Some(Credential::new(value, source))
    }
}

/// Find `KEY=value` in a dotenv-style file without touching the process
/// environment. Missing file → `None`.
fn read_dotenv_value(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let (k, v) = entry?;
        if k == key && !v.is_empty() {
            return Ok(Some(v));
        }
    }
    Ok(None)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pcgate_config::ConfigRecord;

    use super::*;

    const ENV_TOKEN: &str = "111111:env-token-value";
    const FILE_TOKEN: &str = "222222:file-token-value";
    const PERSISTED_TOKEN: &str = "333333:persisted-token";

    fn store_with(
        env: Option<&str>,
        file: Option<&str>,
        persisted: Option<&str>,
        dir: &Path,
    ) -> CredentialStore {
        let record = ConfigRecord {
            telegram_token: persisted.unwrap_or_default().to_string(),
            ..Default::default()
        };
        let secrets = dir.join(".env");
        if let Some(t) = file {
            std::fs::write(&secrets, format!("# bot\nTELEGRAM_BOT_TOKEN=\"{t}\"\n")).unwrap();
        }
        let env: HashMap<String, String> = env
            .map(|v| ("TELEGRAM_BOT_TOKEN".to_string(), v.to_string()))
            .into_iter()
            .collect();
        CredentialStore::new(Arc::new(ConfigStore::in_memory(record)), "TELEGRAM_BOT_TOKEN", 10)
            .with_secrets_file(secrets)
            .with_env_lookup(move |k| env.get(k).cloned())
    }

    #[test]
    fn environment_beats_file_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(Some(ENV_TOKEN), Some(FILE_TOKEN), Some(PERSISTED_TOKEN), dir.path());
        let cred = store.resolve(None).unwrap();
        assert_eq!(cred.expose(), ENV_TOKEN);
        assert_eq!(cred.source(), CredentialSource::Environment);
    }

    #[test]
    fn file_beats_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(None, Some(FILE_TOKEN), Some(PERSISTED_TOKEN), dir.path());
        let cred = store.resolve(None).unwrap();
        assert_eq!(cred.expose(), FILE_TOKEN);
        assert_eq!(cred.source(), CredentialSource::SecretsFile);
    }

    #[test]
    fn persisted_is_last_non_interactive_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(None, None, Some(PERSISTED_TOKEN), dir.path());
        let cred = store.resolve(None).unwrap();
        assert_eq!(cred.source(), CredentialSource::PersistedConfig);
    }

    #[test]
    fn nothing_configured_unattended_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(None, None, None, dir.path());
        assert!(matches!(store.resolve(None), Err(CredentialError::NotConfigured)));
    }

    #[test]
    fn malformed_env_value_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(Some("short"), None, Some(PERSISTED_TOKEN), dir.path());
        let cred = store.resolve(None).unwrap();
        assert_eq!(cred.source(), CredentialSource::PersistedConfig);
    }

    #[test]
    fn resolve_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(Some(ENV_TOKEN), None, None, dir.path());
        let first = store.resolve(None).unwrap();
        let second = store.resolve(None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.resolved_at(), second.resolved_at());
    }

    #[test]
    fn validate_shape_rejects_short_and_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(None, None, None, dir.path());
        assert!(!store.validate_shape("123"));
        assert!(!store.validate_shape("1234567890 abc"));
        assert!(store.validate_shape("1234567890:abc"));
    }

    #[test]
    fn dotenv_parser_handles_quotes_comments_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# comment\n\nOTHER=1\nexport TELEGRAM_BOT_TOKEN='quoted-value-123'\n",
        )
        .unwrap();
        assert_eq!(
            read_dotenv_value(&path, "TELEGRAM_BOT_TOKEN").unwrap().as_deref(),
            Some("quoted-value-123")
        );
        assert_eq!(read_dotenv_value(&path, "MISSING").unwrap(), None);
    }

    #[test]
    fn dotenv_inline_comment_is_not_part_of_the_token() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "TELEGRAM_BOT_TOKEN=123456:abcdefghij # bot token\n",
        )
        .unwrap();
        let store = store_with(None, None, Some(PERSISTED_TOKEN), dir.path());
        let cred = store.resolve(None).unwrap();
        assert_eq!(cred.source(), CredentialSource::SecretsFile);
        assert_eq!(cred.expose(), "123456:abcdefghij");
    }

    #[test]
    fn missing_secrets_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_dotenv_value(&dir.path().join("absent.env"), "TELEGRAM_BOT_TOKEN").unwrap(), None);
    }

    #[test]
    fn persist_rejects_malformed_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(None, None, None, dir.path());
        let bad = Credential::new("tiny", CredentialSource::Interactive);
        assert!(matches!(store.persist(&bad), Err(CredentialError::InvalidShape(_))));
    }
}
