// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The authorization and dispatch core.
//!
//! Every remote request, whichever front-end received it, passes through
//! [`Dispatcher::handle`]. The dispatcher authenticates the caller against
//! the [`AllowList`] (chat) or the [`SessionGate`] (web), looks the command
//! up in the frozen [`CommandRegistry`], enforces its [`RiskClass`], runs the
//! bound [`SubsystemManager`] under a timeout and writes one [`AuditRecord`].

pub mod allowlist;
pub mod audit;
pub mod bootstrap;
pub mod clock;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod manager;
pub mod registry;
pub mod secret;

pub use allowlist::AllowList;
pub use audit::{AuditOutcome, AuditRecord, AuditSink, FanoutAuditSink, MemoryAuditSink, TracingAuditSink};
pub use bootstrap::Prompter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{Credential, CredentialError, CredentialSource, CredentialStore};
pub use dispatch::{
    Caller, DispatchRequest, DispatchResult, Dispatcher, DispatcherBuilder, Origin, WebCredential,
};
pub use error::{DenyReason, DispatchError};
pub use gate::{ClientId, GateError, Session, SessionGate, SessionRecord, SessionToken};
pub use manager::{Invocation, Payload, Subsystem, SubsystemManager};
pub use registry::{
    ArgError, ArgKind, ArgSpec, ArgValues, CommandArgs, CommandDescriptor, CommandRegistry, RegistryBuilder,
    RegistryError, RiskClass,
};
pub use secret::Secret;

pub use pcgate_config::OperatorId;
