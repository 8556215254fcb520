// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pcgate_config::OperatorId;

use crate::registry::CommandArgs;

/// Backend area a command operates on. Each has exactly one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    File,
    Process,
    Network,
    System,
    Monitor,
}

impl Subsystem {
    pub const ALL: [Subsystem; 5] = [
        Subsystem::File,
        Subsystem::Process,
        Subsystem::Network,
        Subsystem::System,
        Subsystem::Monitor,
    ];
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Subsystem::File => "file",
            Subsystem::Process => "process",
            Subsystem::Network => "network",
            Subsystem::System => "system",
            Subsystem::Monitor => "monitor",
        })
    }
}

/// What a manager hands back after a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text { text: String },
    Json { value: Value },
    Empty,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    pub fn json(value: Value) -> Self {
        Payload::Json { value }
    }

    /// Plain-text rendering for front-ends that cannot show structure.
    pub fn to_plain_text(&self) -> String {
        match self {
            Payload::Text { text } => text.clone(),
            Payload::Json { value } => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Payload::Empty => "done".to_string(),
        }
    }
}

/// A fully authorized, validated command handed to a manager.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    pub args: CommandArgs,
    /// The chat operator or bound web operator, when known.
    pub operator: Option<OperatorId>,
}

/// A backend performing the actual privileged operation.
///
/// Managers are only ever called by the dispatcher, after authentication,
/// lookup, argument validation and the risk-class check have all passed.
/// An `Err` is logged in full and reported to the caller as a generic
/// internal error.
#[async_trait]
pub trait SubsystemManager: Send + Sync {
    fn subsystem(&self) -> Subsystem;

    async fn invoke(&self, invocation: &Invocation) -> anyhow::Result<Payload>;
}
