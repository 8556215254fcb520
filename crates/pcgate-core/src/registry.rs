// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The command table.
//!
//! Built once at startup through [`RegistryBuilder`], then frozen into a
//! [`CommandRegistry`] that has no mutating methods. A request can only ever
//! name a command that was registered before the front-ends started.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manager::Subsystem;

/// Declared potential for harm.
///
/// ```text
/// read_only    run for any authorized caller
/// mutating     run; arguments are copied into the audit record
/// destructive  run only when the same request carries a confirmation
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    ReadOnly,
    Mutating,
    Destructive,
}

impl RiskClass {
    /// Whether audit records for this class carry the full arguments.
    pub fn audits_arguments(self) -> bool {
        !matches!(self, RiskClass::ReadOnly)
    }

    pub fn requires_confirmation(self) -> bool {
        matches!(self, RiskClass::Destructive)
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskClass::ReadOnly => "read-only",
            RiskClass::Mutating => "mutating",
            RiskClass::Destructive => "destructive",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    Text,
    Integer,
    Path,
    /// Swallows every remaining positional word. Must be last.
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

impl ArgSpec {
    pub const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self { name, kind, required: false }
    }
}

/// Arguments as the front-end received them, before binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValues {
    Positional(Vec<String>),
    Named(BTreeMap<String, String>),
}

impl Default for ArgValues {
    fn default() -> Self {
        ArgValues::Positional(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("argument '{name}' must be an integer, got '{value}'")]
    NotAnInteger { name: String, value: String },

    #[error("unexpected argument '{0}'")]
    Undeclared(String),

    #[error("too many arguments (expected at most {0})")]
    TooMany(usize),
}

/// Validated arguments keyed by [`ArgSpec::name`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandArgs(BTreeMap<String, String>);

impl CommandArgs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// A required argument. Validation guarantees presence, so a miss here
    /// is a mismatch between the command table and its manager.
    pub fn require(&self, name: &str) -> anyhow::Result<&str> {
        self.get(name)
            .ok_or_else(|| anyhow::anyhow!("argument '{name}' was not bound"))
    }

    pub fn integer(&self, name: &str) -> anyhow::Result<Option<i64>> {
        self.get(name)
            .map(|v| v.parse::<i64>().map_err(|e| anyhow::anyhow!("argument '{name}': {e}")))
            .transpose()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CommandArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        CommandArgs(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub summary: &'static str,
    pub args: Vec<ArgSpec>,
    pub risk: RiskClass,
    pub subsystem: Subsystem,
}

impl CommandDescriptor {
    pub fn new(
        name: &'static str,
        subsystem: Subsystem,
        risk: RiskClass,
        summary: &'static str,
    ) -> Self {
        Self { name, summary, args: Vec::new(), risk, subsystem }
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    /// `name <req> [opt]` usage line for help output.
    pub fn usage(&self) -> String {
        let mut out = self.name.to_string();
        for a in &self.args {
            let label = if a.kind == ArgKind::Rest { format!("{}...", a.name) } else { a.name.to_string() };
            if a.required {
                out.push_str(&format!(" <{label}>"));
            } else {
                out.push_str(&format!(" [{label}]"));
            }
        }
        out
    }

    /// Bind raw values to the declared argument list and validate them.
    pub fn bind(&self, values: &ArgValues) -> Result<CommandArgs, ArgError> {
        let mut bound = BTreeMap::new();
        match values {
            ArgValues::Positional(words) => {
                let mut rest = words.iter();
                for spec in &self.args {
                    if spec.kind == ArgKind::Rest {
                        let tail: Vec<&str> = rest.by_ref().map(String::as_str).collect();
                        if !tail.is_empty() {
                            bound.insert(spec.name.to_string(), tail.join(" "));
                        }
                        break;
                    }
                    match rest.next() {
                        Some(w) => {
                            bound.insert(spec.name.to_string(), w.clone());
                        }
                        None => break,
                    }
                }
                if rest.next().is_some() {
                    return Err(ArgError::TooMany(self.args.len()));
                }
            }
            ArgValues::Named(map) => {
                for (k, v) in map {
                    if !self.args.iter().any(|a| a.name == k.as_str()) {
                        return Err(ArgError::Undeclared(k.clone()));
                    }
                    bound.insert(k.clone(), v.clone());
                }
            }
        }

        for spec in &self.args {
            match bound.get(spec.name) {
                None if spec.required => return Err(ArgError::Missing(spec.name.to_string())),
                Some(v) if spec.kind == ArgKind::Integer && v.parse::<i64>().is_err() => {
                    return Err(ArgError::NotAnInteger {
                        name: spec.name.to_string(),
                        value: v.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(CommandArgs(bound))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command '{0}' registered twice")]
    Duplicate(String),

    #[error("command '{0}' declares a rest argument before its last position")]
    MisplacedRest(String),
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    commands: HashMap<&'static str, CommandDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<&mut Self, RegistryError> {
        let rest_pos = descriptor.args.iter().position(|a| a.kind == ArgKind::Rest);
        if matches!(rest_pos, Some(i) if i + 1 != descriptor.args.len()) {
            return Err(RegistryError::MisplacedRest(descriptor.name.to_string()));
        }
        if self.commands.contains_key(descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name.to_string()));
        }
        self.commands.insert(descriptor.name, descriptor);
        Ok(self)
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry { commands: self.commands }
    }
}

/// Frozen name → descriptor table.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandDescriptor>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(name)
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<&CommandDescriptor> {
        let mut out: Vec<&CommandDescriptor> = self.commands.values().collect();
        out.sort_by_key(|d| d.name);
        out
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
