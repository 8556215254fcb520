// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The persisted configuration record (`config.json`).
//!
//! One JSON document holds the bot credential, the web password, the
//! operator allow-list and a few pieces of per-operator state. Every field
//! is defaulted so a partially written or hand-edited file still loads.
//!
//! ```json
//! {
//!   "telegram_token": "",
//!   "password": "",
//!   "allowed_user_ids": [123456789, "ops-laptop"],
//!   "current_directories": { "123456789": "/home/me" },
//!   "monitored_paths": [],
//!   "startup_enabled": false
//! }
//! ```
//!
//! The template shipped with a fresh install has both secrets empty.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// A remote operator identity: a chat platform user id or a free-form name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperatorId {
    Numeric(i64),
    Name(String),
}

impl OperatorId {
    /// Stable string key used for per-operator maps in the record.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorId::Numeric(n) => write!(f, "{n}"),
            OperatorId::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for OperatorId {
    fn from(n: i64) -> Self {
        OperatorId::Numeric(n)
    }
}

impl FromStr for OperatorId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("operator id must not be empty");
        }
        Ok(match s.parse::<i64>() {
            Ok(n) => OperatorId::Numeric(n),
            Err(_) => OperatorId::Name(s.to_string()),
        })
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Long-lived bot credential. Empty means "not persisted".
    #[serde(default)]
    pub telegram_token: String,
    /// Web password. Empty means web login is impossible.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub allowed_user_ids: BTreeSet<OperatorId>,
    /// operator key → last directory used by the file manager
    #[serde(default)]
    pub current_directories: BTreeMap<String, String>,
    /// Directory roots re-armed by the directory monitor at startup.
    #[serde(default)]
    pub monitored_paths: Vec<String>,
    /// Whether the desktop autostart entry is installed.
    #[serde(default)]
    pub startup_enabled: bool,
}

impl fmt::Debug for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRecord")
            .field("telegram_token", &redact(&self.telegram_token))
            .field("password", &redact(&self.password))
            .field("allowed_user_ids", &self.allowed_user_ids)
            .field("current_directories", &self.current_directories)
            .field("monitored_paths", &self.monitored_paths)
            .field("startup_enabled", &self.startup_enabled)
            .finish()
    }
}

impl ConfigRecord {
    /// Copy of the record with both secrets replaced by a marker, suitable
    /// for `show-settings` style output.
    pub fn redacted(&self) -> ConfigRecord {
        ConfigRecord {
            telegram_token: redact(&self.telegram_token).to_string(),
            password: redact(&self.password).to_string(),
            ..self.clone()
        }
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_loads_as_template() {
        let rec: ConfigRecord = serde_json::from_str("{}").unwrap();
        assert!(rec.telegram_token.is_empty());
        assert!(rec.password.is_empty());
        assert!(rec.allowed_user_ids.is_empty());
    }

    #[test]
    fn mixed_operator_ids_parse() {
        let rec: ConfigRecord =
            serde_json::from_str(r#"{"allowed_user_ids": [42, "ops-laptop"]}"#).unwrap();
        assert!(rec.allowed_user_ids.contains(&OperatorId::Numeric(42)));
        assert!(rec
            .allowed_user_ids
            .contains(&OperatorId::Name("ops-laptop".into())));
    }

    #[test]
    fn debug_never_prints_secrets() {
        let rec = ConfigRecord {
            telegram_token: "123456:very-secret-token".into(),
            password: "hunter22".into(),
            ..Default::default()
        };
        let dbg = format!("{rec:?}");
        assert!(!dbg.contains("very-secret-token"));
        assert!(!dbg.contains("hunter22"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn operator_id_from_str_prefers_numeric() {
        assert_eq!("  77 ".parse::<OperatorId>().unwrap(), OperatorId::Numeric(77));
        assert_eq!(
            "alice".parse::<OperatorId>().unwrap(),
            OperatorId::Name("alice".into())
        );
        assert!("   ".parse::<OperatorId>().is_err());
    }
}
