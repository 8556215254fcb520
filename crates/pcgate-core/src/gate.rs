// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Password verification and web sessions.
//!
//! # Security model
//!
//! The stored password is compared in constant time against a SHA-256 of
//! the candidate (see [`Secret::matches`]). An empty stored password never
//! verifies, so a fresh install with the template record is closed.
//!
//! Session tokens are 256-bit OS-random values, base64url encoded. The raw
//! token is handed to the client once; the gate only keeps its SHA-256.
//! A session past `expires_at` is treated exactly like an unknown token and
//! dropped on sight.
//!
//! # Brute-force limiting
//!
//! Failed verifications are counted per client in a fixed window:
//!
//! ```text
//! first failure        → window opens, failures = 1
//! failures < max       → attempts are checked normally
//! failures >= max      → every attempt is RateLimited until the window ends,
//!                        including one carrying the right password
//! window elapsed       → counter discarded
//! success              → counter discarded
//! ```

use std::{
    collections::HashMap,
    fmt,
    net::IpAddr,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use pcgate_config::{AuthSettings, ConfigStore, OperatorId};

use crate::{
    clock::Clock,
    error::{DenyReason, DispatchError},
    secret::{sha256, Secret},
};

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Who is knocking, for rate-limiting and session binding. For the web
/// front-end this is the peer IP; for chat enrollment it is `chat:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    pub fn for_operator(id: &OperatorId) -> Self {
        ClientId(format!("chat:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for ClientId {
    fn from(ip: IpAddr) -> Self {
        ClientId(ip.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bearer session token as issued to or presented by a client.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(Secret);

impl SessionToken {
    /// 32 bytes from the OS CSPRNG, 43 characters of base64url.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        SessionToken(Secret::new(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Wrap a token string received from a client.
    pub fn presented(raw: impl Into<String>) -> Self {
        SessionToken(Secret::new(raw))
    }

    /// The raw token. Only the response that issues it should call this.
    pub fn expose(&self) -> &str {
        self.0.expose()
    }

    fn digest(&self) -> [u8; 32] {
        sha256(self.0.expose().as_bytes())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub client: ClientId,
    /// Operator identity the session was opened for, if any.
    pub operator: Option<OperatorId>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A freshly issued session: the raw token plus what the gate remembers.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub record: SessionRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("access denied")]
    Unauthorized(DenyReason),

    #[error("too many failed attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl GateError {
    pub fn deny_reason(&self) -> DenyReason {
        match self {
            GateError::Unauthorized(r) => *r,
            GateError::RateLimited { .. } => DenyReason::RateLimited,
        }
    }
}

impl From<GateError> for DispatchError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Unauthorized(_) => DispatchError::Unauthorized,
            GateError::RateLimited { retry_after_secs } => {
                DispatchError::RateLimited { retry_after_secs }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    started: DateTime<Utc>,
    failures: u32,
}

// ── Gate ─────────────────────────────────────────────────────────────────────

pub struct SessionGate {
    config: Arc<ConfigStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_failures: u32,
    window: Duration,
    min_password_len: usize,
    /// SHA-256(token) → record.
    sessions: Mutex<HashMap<[u8; 32], SessionRecord>>,
    failures: Mutex<HashMap<ClientId, FailureWindow>>,
}

impl SessionGate {
    pub fn new(config: Arc<ConfigStore>, clock: Arc<dyn Clock>, auth: &AuthSettings) -> Self {
        Self {
            config,
            clock,
            ttl: secs(auth.session_ttl_secs),
            max_failures: auth.max_failed_attempts.max(1),
            window: secs(auth.failure_window_secs),
            min_password_len: auth.min_password_len,
            sessions: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Check `candidate` against the stored password for `client`.
    ///
    /// The failure table stays locked for the whole check so concurrent
    /// guesses from one client cannot overrun the limit.
    pub fn verify_password(&self, client: &ClientId, candidate: &str) -> Result<(), GateError> {
        let now = self.clock.now();
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(w) = failures.get(client).copied() {
            let ends = w.started + self.window;
            if now >= ends {
                failures.remove(client);
            } else if w.failures >= self.max_failures {
                let retry_after_secs = (ends - now).num_seconds().max(1) as u64;
                debug!(%client, retry_after_secs, "password attempt while rate limited");
                return Err(GateError::RateLimited { retry_after_secs });
            }
        }

        let stored = Secret::new(self.config.snapshot().password.clone());
        let reason = if stored.is_empty() {
            DenyReason::PasswordNotSet
        } else if stored.matches(candidate) {
            failures.remove(client);
            return Ok(());
        } else {
            DenyReason::WrongPassword
        };

        let w = failures
            .entry(client.clone())
            .or_insert(FailureWindow { started: now, failures: 0 });
        w.failures += 1;
        warn!(%client, failures = w.failures, "password verification failed");
        Err(GateError::Unauthorized(reason))
    }

    /// Mint a session for `client`. Call only after a successful verify.
    pub fn issue_session(&self, client: &ClientId, operator: Option<OperatorId>) -> Session {
        let now = self.clock.now();
        let token = SessionToken::generate();
        let record = SessionRecord {
            client: client.clone(),
            operator,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, r| !r.is_expired(now));
        sessions.insert(token.digest(), record.clone());
        info!(%client, expires_at = %record.expires_at, "web session issued");
        Session { token, record }
    }

    /// Verify and, on success, issue a session in one step.
    pub fn login(
        &self,
        client: &ClientId,
        password: &str,
        operator: Option<OperatorId>,
    ) -> Result<Session, GateError> {
        self.verify_password(client, password)?;
        Ok(self.issue_session(client, operator))
    }

    /// Look a token up. Expired entries are removed and reported as such.
    pub fn validate(&self, token: &SessionToken) -> Result<SessionRecord, DenyReason> {
        let now = self.clock.now();
        let digest = token.digest();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(&digest) {
            None => Err(DenyReason::UnknownSession),
            Some(r) if r.is_expired(now) => {
                sessions.remove(&digest);
                Err(DenyReason::SessionExpired)
            }
            Some(r) => Ok(r.clone()),
        }
    }

    pub fn is_valid(&self, token: &SessionToken) -> bool {
        self.validate(token).is_ok()
    }

    /// End one session (logout). Returns whether it existed.
    pub fn revoke(&self, token: &SessionToken) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&token.digest())
            .is_some()
    }

    pub fn revoke_all(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let n = sessions.len();
        sessions.clear();
        n
    }

    /// Drop expired sessions and stale failure windows.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, r| !r.is_expired(now));
        let purged = before - sessions.len();
        drop(sessions);

        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, w| now < w.started + self.window);
        if purged > 0 {
            debug!(purged, "expired sessions removed");
        }
        purged
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Replace the stored password and end every open session.
    ///
    /// Administrative only: no remote request path leads here.
    pub fn change_password(&self, new_password: &str) -> anyhow::Result<()> {
        if new_password.chars().count() < self.min_password_len {
            anyhow::bail!("password must be at least {} characters", self.min_password_len);
        }
        let value = new_password.to_string();
        self.config.update(move |r| r.password = value)?;
        let revoked = self.revoke_all();
        info!(revoked, "password changed; all sessions revoked");
        Ok(())
    }
}

fn secs(s: u64) -> Duration {
    Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX / 1000))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
