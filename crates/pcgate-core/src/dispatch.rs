// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `Dispatcher` — the single gate every remote request passes through.
//!
//! # Flow
//!
//! ```text
//!   chat poller ──┐
//!                 ├──► Dispatcher::handle(DispatchRequest)
//!   web server  ──┘          │
//!                            ├─ Authenticating   allow-list (chat) / session or password (web)
//!                            ├─ Authorized       registry lookup, argument binding
//!                            ├─ risk policy      destructive ⇒ confirmed or ConfirmationRequired
//!                            ├─ Executing        spawned task under a timeout
//!                            └─ Completed        one AuditRecord, whatever happened
//! ```
//!
//! Any step may end the request as rejected or failed. Callers only ever see
//! a [`DispatchError`]; the specific internal reason goes to the audit sink.
//! Unauthenticated callers never reach the registry, so they cannot probe
//! which commands exist.
//!
//! The dispatcher is a cheap `Clone` (an `Arc` inside). No lock is held
//! while a manager runs, and a failing, panicking or hung manager affects
//! only its own request.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use pcgate_config::{OperatorId, WebIdentityPolicy};

use crate::{
    allowlist::AllowList,
    audit::{AuditOutcome, AuditRecord, AuditSink},
    error::{DenyReason, DispatchError},
    gate::{ClientId, GateError, Session, SessionGate, SessionRecord, SessionToken},
    manager::{Invocation, Payload, Subsystem, SubsystemManager},
    registry::{ArgValues, CommandArgs, CommandRegistry, RiskClass},
    secret::Secret,
};

/// Which front-end a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Chat,
    Web,
}

/// How a web request proves itself.
#[derive(Debug, Clone)]
pub enum WebCredential {
    Session(SessionToken),
    /// One-shot password login; a session is issued on success.
    Password {
        client: ClientId,
        password: Secret,
        operator: Option<OperatorId>,
    },
}

#[derive(Debug, Clone)]
pub enum Caller {
    Chat { operator: OperatorId },
    Web(WebCredential),
}

impl Caller {
    pub fn origin(&self) -> Origin {
        match self {
            Caller::Chat { .. } => Origin::Chat,
            Caller::Web(_) => Origin::Web,
        }
    }

    /// Audit label before authentication. Never contains a secret.
    fn provisional_label(&self) -> String {
        match self {
            Caller::Chat { operator } => format!("chat:{operator}"),
            Caller::Web(WebCredential::Session(_)) => "web:session".to_string(),
            Caller::Web(WebCredential::Password { client, .. }) => format!("web:{client}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub caller: Caller,
    pub command: String,
    pub args: ArgValues,
    /// Explicit confirmation for destructive commands.
    pub confirmed: bool,
}

impl DispatchRequest {
    pub fn new(caller: Caller, command: impl Into<String>, args: ArgValues) -> Self {
        Self { caller, command: command.into(), args, confirmed: false }
    }

    pub fn chat(operator: OperatorId, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(Caller::Chat { operator }, command, ArgValues::Positional(args))
    }

    pub fn confirm(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub outcome: Result<Payload, DispatchError>,
    /// Set when a web password login minted a new session.
    pub issued_session: Option<Session>,
    pub audit: AuditRecord,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.outcome.as_ref().err()
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Received,
    Authenticating,
    Authorized,
    Executing,
    Completed,
}

/// Authenticated caller.
struct Principal {
    label: String,
    operator: Option<OperatorId>,
}

/// Why a request stopped: what the caller sees and what the audit log keeps.
struct Stop {
    error: DispatchError,
    outcome: AuditOutcome,
}

impl Stop {
    fn denied(reason: DenyReason) -> Self {
        Stop {
            error: DispatchError::Unauthorized,
            outcome: AuditOutcome::Rejected { reason },
        }
    }

    fn rejected(error: DispatchError, reason: DenyReason) -> Self {
        Stop { error, outcome: AuditOutcome::Rejected { reason } }
    }

    fn failed(error: DispatchError) -> Self {
        let kind = error.code().to_string();
        Stop { error, outcome: AuditOutcome::Failed { kind } }
    }
}

impl From<GateError> for Stop {
    fn from(e: GateError) -> Self {
        let reason = e.deny_reason();
        Stop::rejected(e.into(), reason)
    }
}

/// Audit fields gathered while a request moves through the stages.
struct Trace {
    request_id: Uuid,
    origin: Origin,
    principal: String,
    command: String,
    risk: Option<RiskClass>,
    args: Option<CommandArgs>,
    started: Instant,
}

impl Trace {
    fn stage(&self, stage: Stage) {
        debug!(request_id = %self.request_id, command = %self.command, ?stage, "dispatch");
    }

    fn finish(self, outcome: AuditOutcome) -> AuditRecord {
        AuditRecord {
            request_id: self.request_id,
            origin: self.origin,
            principal: self.principal,
            command: self.command,
            risk: self.risk,
            args: self.args,
            outcome,
            timestamp: Utc::now(),
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub struct DispatcherBuilder {
    registry: CommandRegistry,
    allowlist: AllowList,
    gate: Arc<SessionGate>,
    audit: Arc<dyn AuditSink>,
    managers: HashMap<Subsystem, Arc<dyn SubsystemManager>>,
    timeout: Duration,
    web_identity: WebIdentityPolicy,
    chat_enrollment: bool,
}

impl DispatcherBuilder {
    pub fn new(
        registry: CommandRegistry,
        allowlist: AllowList,
        gate: Arc<SessionGate>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            allowlist,
            gate,
            audit,
            managers: HashMap::new(),
            timeout: Duration::from_secs(30),
            web_identity: WebIdentityPolicy::default(),
            chat_enrollment: false,
        }
    }

    pub fn manager(mut self, manager: Arc<dyn SubsystemManager>) -> Self {
        self.managers.insert(manager.subsystem(), manager);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn web_identity(mut self, policy: WebIdentityPolicy) -> Self {
        self.web_identity = policy;
        self
    }

    pub fn chat_enrollment(mut self, enabled: bool) -> Self {
        self.chat_enrollment = enabled;
        self
    }

    /// Fails when a registered command targets a subsystem with no manager.
    pub fn build(self) -> anyhow::Result<Dispatcher> {
        for d in self.registry.descriptors() {
            if !self.managers.contains_key(&d.subsystem) {
                anyhow::bail!(
                    "command '{}' targets the {} subsystem but no manager is registered for it",
                    d.name,
                    d.subsystem
                );
            }
        }
        Ok(Dispatcher {
            inner: Arc::new(Inner {
                registry: self.registry,
                allowlist: self.allowlist,
                gate: self.gate,
                audit: self.audit,
                managers: self.managers,
                timeout: self.timeout,
                web_identity: self.web_identity,
                chat_enrollment: self.chat_enrollment,
            }),
        })
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

struct Inner {
    registry: CommandRegistry,
    allowlist: AllowList,
    gate: Arc<SessionGate>,
    audit: Arc<dyn AuditSink>,
    managers: HashMap<Subsystem, Arc<dyn SubsystemManager>>,
    timeout: Duration,
    web_identity: WebIdentityPolicy,
    chat_enrollment: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder(
        registry: CommandRegistry,
        allowlist: AllowList,
        gate: Arc<SessionGate>,
        audit: Arc<dyn AuditSink>,
    ) -> DispatcherBuilder {
        DispatcherBuilder::new(registry, allowlist, gate, audit)
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    pub fn allowlist(&self) -> &AllowList {
        &self.inner.allowlist
    }

    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.inner.gate
    }

    pub fn web_identity(&self) -> WebIdentityPolicy {
        self.inner.web_identity
    }

    pub fn chat_enrollment(&self) -> bool {
        self.inner.chat_enrollment
    }

    /// Run one request to completion. Never panics, never returns early
    /// without writing an audit record.
    pub async fn handle(&self, request: DispatchRequest) -> DispatchResult {
        let mut trace = Trace {
            request_id: Uuid::new_v4(),
            origin: request.caller.origin(),
            principal: request.caller.provisional_label(),
            command: request.command.clone(),
            risk: None,
            args: None,
            started: Instant::now(),
        };
        trace.stage(Stage::Received);

        let mut issued_session = None;
        let outcome = self.run(&request, &mut trace, &mut issued_session).await;

        let (outcome, audit_outcome) = match outcome {
            Ok(payload) => {
                trace.stage(Stage::Completed);
                (Ok(payload), AuditOutcome::Completed)
            }
            Err(stop) => (Err(stop.error), stop.outcome),
        };
        let audit = trace.finish(audit_outcome);
        self.inner.audit.record(&audit);

        DispatchResult { outcome, issued_session, audit }
    }

    async fn run(
        &self,
        request: &DispatchRequest,
        trace: &mut Trace,
        issued_session: &mut Option<Session>,
    ) -> Result<Payload, Stop> {
        trace.stage(Stage::Authenticating);
        let principal = self.authenticate(&request.caller, issued_session)?;
        trace.principal = principal.label;

        trace.stage(Stage::Authorized);
        let descriptor = self.inner.registry.lookup(&request.command).ok_or_else(|| {
            Stop::rejected(
                DispatchError::UnknownCommand { name: request.command.clone() },
                DenyReason::UnknownCommand,
            )
        })?;
        trace.risk = Some(descriptor.risk);

        let args = descriptor.bind(&request.args).map_err(|e| {
            Stop::rejected(
                DispatchError::InvalidArguments { reason: e.to_string() },
                DenyReason::InvalidArguments,
            )
        })?;
        if descriptor.risk.audits_arguments() {
            trace.args = Some(args.clone());
        }

        if descriptor.risk.requires_confirmation() && !request.confirmed {
            return Err(Stop::rejected(
                DispatchError::ConfirmationRequired { command: descriptor.name.to_string() },
                DenyReason::ConfirmationRequired,
            ));
        }

        let manager = self.inner.managers.get(&descriptor.subsystem).cloned().ok_or_else(|| {
            error!(subsystem = %descriptor.subsystem, "no manager bound for subsystem");
            Stop::failed(DispatchError::InternalError)
        })?;

        trace.stage(Stage::Executing);
        let invocation = Invocation {
            command: descriptor.name.to_string(),
            args,
            operator: principal.operator,
        };
        self.execute(manager, invocation, trace.request_id).await
    }

    fn authenticate(
        &self,
        caller: &Caller,
        issued_session: &mut Option<Session>,
    ) -> Result<Principal, Stop> {
        match caller {
            Caller::Chat { operator } => {
                if !self.inner.allowlist.is_allowed(operator) {
                    return Err(Stop::denied(DenyReason::NotOnAllowList));
                }
                Ok(Principal {
                    label: format!("chat:{operator}"),
                    operator: Some(operator.clone()),
                })
            }
            Caller::Web(WebCredential::Session(token)) => {
                let record = self.inner.gate.validate(token).map_err(Stop::denied)?;
                self.check_web_operator(record.operator.as_ref())?;
                Ok(web_principal(&record.client, record.operator))
            }
            Caller::Web(WebCredential::Password { client, password, operator }) => {
                self.inner.gate.verify_password(client, password.expose())?;
                self.check_web_operator(operator.as_ref())?;
                let session = self.inner.gate.issue_session(client, operator.clone());
                *issued_session = Some(session);
                Ok(web_principal(client, operator.clone()))
            }
        }
    }

    /// Under `password_and_allow_list`, web callers must name an operator
    /// that is on the allow-list right now.
    fn check_web_operator(&self, operator: Option<&OperatorId>) -> Result<(), Stop> {
        if self.inner.web_identity != WebIdentityPolicy::PasswordAndAllowList {
            return Ok(());
        }
        match operator {
            None => Err(Stop::denied(DenyReason::OperatorRequired)),
            Some(op) if !self.inner.allowlist.is_allowed(op) => {
                Err(Stop::denied(DenyReason::NotOnAllowList))
            }
            Some(_) => Ok(()),
        }
    }

    async fn execute(
        &self,
        manager: Arc<dyn SubsystemManager>,
        invocation: Invocation,
        request_id: Uuid,
    ) -> Result<Payload, Stop> {
        let command = invocation.command.clone();
        let task = tokio::spawn(async move { manager.invoke(&invocation).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.inner.timeout, task).await {
            Err(_) => {
                abort.abort();
                warn!(%request_id, %command, timeout = ?self.inner.timeout, "manager timed out; task aborted");
                Err(Stop::failed(DispatchError::Timeout))
            }
            Ok(Err(join)) => {
                error!(%request_id, %command, "manager task died: {join}");
                Err(Stop::failed(DispatchError::InternalError))
            }
            Ok(Ok(Err(e))) => {
                error!(%request_id, %command, "manager failed: {e:#}");
                Err(Stop::failed(DispatchError::InternalError))
            }
            Ok(Ok(Ok(payload))) => Ok(payload),
        }
    }

    /// Validate a web session without running a command, applying the same
    /// operator policy as [`Dispatcher::handle`]. Not audited.
    pub fn check_session(&self, token: &SessionToken) -> Result<SessionRecord, DispatchError> {
        let record = self.inner.gate.validate(token).map_err(|_| DispatchError::Unauthorized)?;
        self.check_web_operator(record.operator.as_ref()).map_err(|stop| stop.error)?;
        Ok(record)
    }

    /// Web login: prove the password, receive a session in
    /// `issued_session`. Audited as command `login`.
    pub fn login(
        &self,
        client: ClientId,
        password: Secret,
        operator: Option<OperatorId>,
    ) -> DispatchResult {
        let caller = Caller::Web(WebCredential::Password { client, password, operator });
        let mut trace = Trace {
            request_id: Uuid::new_v4(),
            origin: Origin::Web,
            principal: caller.provisional_label(),
            command: "login".to_string(),
            risk: None,
            args: None,
            started: Instant::now(),
        };
        trace.stage(Stage::Authenticating);

        let mut issued_session = None;
        let (outcome, audit_outcome) = match self.authenticate(&caller, &mut issued_session) {
            Ok(principal) => {
                trace.principal = principal.label;
                (Ok(Payload::Empty), AuditOutcome::Completed)
            }
            Err(stop) => (Err(stop.error), stop.outcome),
        };
        let audit = trace.finish(audit_outcome);
        self.inner.audit.record(&audit);
        DispatchResult { outcome, issued_session, audit }
    }

    /// Chat `/help`: only allow-listed operators may list commands. Audited
    /// as command `help` whether or not it is granted.
    pub fn chat_help(&self, operator: &OperatorId) -> DispatchResult {
        let caller = Caller::Chat { operator: operator.clone() };
        let mut trace = Trace {
            request_id: Uuid::new_v4(),
            origin: Origin::Chat,
            principal: caller.provisional_label(),
            command: "help".to_string(),
            risk: None,
            args: None,
            started: Instant::now(),
        };
        trace.stage(Stage::Authenticating);

        let (outcome, audit_outcome) = match self.authenticate(&caller, &mut None) {
            Ok(principal) => {
                trace.principal = principal.label;
                (Ok(Payload::Empty), AuditOutcome::Completed)
            }
            Err(stop) => (Err(stop.error), stop.outcome),
        };
        let audit = trace.finish(audit_outcome);
        self.inner.audit.record(&audit);
        DispatchResult { outcome, issued_session: None, audit }
    }

    /// Chat `/auth <password>`: join the allow-list by proving the password.
    ///
    /// Rate limited per chat identity through the session gate. Disabled
    /// unless `auth.chat_enrollment` is on.
    pub async fn enroll_chat(&self, operator: &OperatorId, password: &str) -> DispatchResult {
        let mut trace = Trace {
            request_id: Uuid::new_v4(),
            origin: Origin::Chat,
            principal: format!("chat:{operator}"),
            command: "auth".to_string(),
            risk: Some(RiskClass::Mutating),
            args: None,
            started: Instant::now(),
        };
        trace.stage(Stage::Received);

        let outcome = self.enroll(operator, password).await;
        let (outcome, audit_outcome) = match outcome {
            Ok(payload) => (Ok(payload), AuditOutcome::Completed),
            Err(stop) => (Err(stop.error), stop.outcome),
        };
        let audit = trace.finish(audit_outcome);
        self.inner.audit.record(&audit);
        DispatchResult { outcome, issued_session: None, audit }
    }

    async fn enroll(&self, operator: &OperatorId, password: &str) -> Result<Payload, Stop> {
        if !self.inner.chat_enrollment {
            return Err(Stop::denied(DenyReason::EnrollmentDisabled));
        }
        self.inner
            .gate
            .verify_password(&ClientId::for_operator(operator), password)?;

        // The record write fsyncs; keep it off the async workers.
        let allowlist = self.inner.allowlist.clone();
        let newcomer = operator.clone();
        let added = tokio::task::spawn_blocking(move || allowlist.add(newcomer)).await;
        match added {
            Ok(Ok(_)) => Ok(Payload::text("authorized")),
            Ok(Err(e)) => {
                error!(%operator, "could not persist enrollment: {e:#}");
                Err(Stop::failed(DispatchError::InternalError))
            }
            Err(join) => {
                error!(%operator, "enrollment task died: {join}");
                Err(Stop::failed(DispatchError::InternalError))
            }
        }
    }
}

fn web_principal(client: &ClientId, operator: Option<OperatorId>) -> Principal {
    let label = match &operator {
        Some(op) => format!("web:{client}/{op}"),
        None => format!("web:{client}"),
    };
    Principal { label, operator }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
