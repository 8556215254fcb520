// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! One audit record per dispatched request, whatever the outcome.
//!
//! Records never contain a credential, a password or a session token.
//! Web sessions are labelled by the client they were issued to.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dispatch::Origin,
    error::DenyReason,
    registry::{CommandArgs, RiskClass},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Completed,
    Rejected { reason: DenyReason },
    Failed { kind: String },
}

impl AuditOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AuditOutcome::Completed => "completed",
            AuditOutcome::Rejected { .. } => "rejected",
            AuditOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub origin: Origin,
    /// `chat:<id>`, `web:<client>` or `web:<client>/<operator>`.
    pub principal: String,
    pub command: String,
    /// `None` when the request was rejected before lookup.
    pub risk: Option<RiskClass>,
    /// Only recorded for mutating and destructive commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<CommandArgs>,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Consumer of audit records. Called once per request, possibly from many
/// tasks at once.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Emits each record as a structured `tracing` event on `pcgate::audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, r: &AuditRecord) {
        let args = r
            .args
            .as_ref()
            .and_then(|a| serde_json::to_string(a).ok())
            .unwrap_or_default();
        let risk = r.risk.map(|k| k.to_string()).unwrap_or_default();
        let detail = match &r.outcome {
            AuditOutcome::Completed => String::new(),
            AuditOutcome::Rejected { reason } => format!("{reason:?}"),
            AuditOutcome::Failed { kind } => kind.clone(),
        };
        match r.outcome {
            AuditOutcome::Completed => tracing::info!(
                target: "pcgate::audit",
                request_id = %r.request_id,
                origin = ?r.origin,
                principal = %r.principal,
                command = %r.command,
                risk = %risk,
                args = %args,
                elapsed_ms = r.elapsed_ms,
                "completed"
            ),
            _ => tracing::warn!(
                target: "pcgate::audit",
                request_id = %r.request_id,
                origin = ?r.origin,
                principal = %r.principal,
                command = %r.command,
                risk = %risk,
                args = %args,
                detail = %detail,
                elapsed_ms = r.elapsed_ms,
                "{}",
                r.outcome.label()
            ),
        }
    }
}

/// Keeps every record in memory. Used by tests and the status command.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

/// Forwards each record to every inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, record: &AuditRecord) {
        for s in &self.sinks {
            s.record(record);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
