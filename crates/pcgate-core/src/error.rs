// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Error taxonomy shared by every front-end.
//!
//! [`DispatchError`] is what a caller sees. Its messages are deliberately
//! generic: a denied caller cannot tell a wrong identity from a wrong
//! password or an expired session. The precise cause is kept in
//! [`DenyReason`], which only ever reaches the audit log.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-facing outcome of a failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("service is not configured")]
    NotConfigured,

    #[error("access denied")]
    Unauthorized,

    #[error("too many failed attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("unknown command: {name}")]
    UnknownCommand { name: String },

    #[error("'{command}' is destructive and must be confirmed")]
    ConfirmationRequired { command: String },

    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("internal error")]
    InternalError,

    #[error("operation timed out")]
    Timeout,
}

impl DispatchError {
    /// Short stable code for wire formats and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotConfigured => "not_configured",
            DispatchError::Unauthorized => "unauthorized",
            DispatchError::RateLimited { .. } => "rate_limited",
            DispatchError::UnknownCommand { .. } => "unknown_command",
            DispatchError::ConfirmationRequired { .. } => "confirmation_required",
            DispatchError::InvalidArguments { .. } => "invalid_arguments",
            DispatchError::InternalError => "internal_error",
            DispatchError::Timeout => "timeout",
        }
    }

    /// `true` when the caller can fix the request and resubmit.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DispatchError::ConfirmationRequired { .. } | DispatchError::InvalidArguments { .. }
        )
    }
}

/// Internal reason a request was rejected. Audit-only; never sent to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotOnAllowList,
    UnknownSession,
    SessionExpired,
    WrongPassword,
    PasswordNotSet,
    OperatorRequired,
    EnrollmentDisabled,
    RateLimited,
    UnknownCommand,
    ConfirmationRequired,
    InvalidArguments,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
