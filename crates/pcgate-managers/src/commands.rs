// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The default command table and the managers that serve it.

use std::sync::Arc;

use pcgate_config::ConfigStore;
use pcgate_core::{
    ArgKind, ArgSpec, CommandDescriptor, CommandRegistry, RegistryBuilder, RegistryError,
    RiskClass::{Destructive, Mutating, ReadOnly},
    Subsystem::{File, Monitor, Network, Process, System},
    SubsystemManager,
};

use crate::{DirectoryMonitor, FileManager, NetworkManager, ProcessManager, SystemManager};

fn table() -> Vec<CommandDescriptor> {
    use ArgKind::{Integer, Path, Rest, Text};
    vec![
        // ── file ──
        CommandDescriptor::new("ls", File, ReadOnly, "List a directory (default: current)")
            .arg(ArgSpec::optional("path", Path)),
        CommandDescriptor::new("cwd", File, ReadOnly, "Show the current directory"),
        CommandDescriptor::new("cd", File, Mutating, "Change the current directory")
            .arg(ArgSpec::required("path", Path)),
        CommandDescriptor::new("stat", File, ReadOnly, "Show file details")
            .arg(ArgSpec::required("path", Path)),
        CommandDescriptor::new("mkdir", File, Mutating, "Create a directory")
            .arg(ArgSpec::required("path", Path)),
        CommandDescriptor::new("rename", File, Mutating, "Rename a file or directory")
            .arg(ArgSpec::required("path", Path))
            .arg(ArgSpec::required("new_name", Text)),
        CommandDescriptor::new("copy", File, Mutating, "Copy a file or directory")
            .arg(ArgSpec::required("path", Path))
            .arg(ArgSpec::required("destination", Path)),
        CommandDescriptor::new("move", File, Mutating, "Move a file or directory")
            .arg(ArgSpec::required("path", Path))
            .arg(ArgSpec::required("destination", Path)),
        CommandDescriptor::new("delete", File, Destructive, "Delete a file or directory")
            .arg(ArgSpec::required("path", Path)),
        // ── process ──
        CommandDescriptor::new("ps", Process, ReadOnly, "List processes by memory use")
            .arg(ArgSpec::optional("limit", Integer)),
        CommandDescriptor::new("proc", Process, ReadOnly, "Show one process")
            .arg(ArgSpec::required("pid", Integer)),
        CommandDescriptor::new("run", Process, Mutating, "Start a program")
            .arg(ArgSpec::required("path", Path))
            .arg(ArgSpec::optional("args", Rest)),
        CommandDescriptor::new("kill", Process, Destructive, "Terminate a process")
            .arg(ArgSpec::required("pid", Integer)),
        // ── network ──
        CommandDescriptor::new("ip", Network, ReadOnly, "Show the local address"),
        CommandDescriptor::new("publicip", Network, ReadOnly, "Show the public address"),
        CommandDescriptor::new("dns", Network, ReadOnly, "Resolve a host name")
            .arg(ArgSpec::required("host", Text)),
        CommandDescriptor::new("ping", Network, ReadOnly, "Ping a host")
            .arg(ArgSpec::required("host", Text)),
        CommandDescriptor::new("netstat", Network, ReadOnly, "List open sockets"),
        // ── system ──
        CommandDescriptor::new("status", System, ReadOnly, "Host status"),
        CommandDescriptor::new("lock", System, Mutating, "Lock the session"),
        CommandDescriptor::new("shutdown", System, Destructive, "Power off the machine"),
        CommandDescriptor::new("reboot", System, Destructive, "Restart the machine"),
        CommandDescriptor::new("startup", System, Mutating, "Show or set login autostart (on|off)")
            .arg(ArgSpec::optional("state", Text)),
        // ── monitor ──
        CommandDescriptor::new("watch", Monitor, Mutating, "Report changes under a directory")
            .arg(ArgSpec::required("path", Path)),
        CommandDescriptor::new("unwatch", Monitor, Mutating, "Stop watching one or all directories")
            .arg(ArgSpec::optional("path", Path)),
        CommandDescriptor::new("watches", Monitor, ReadOnly, "List watched directories"),
    ]
}

/// Build the frozen default registry.
pub fn default_registry() -> Result<CommandRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    for d in table() {
        builder.register(d)?;
    }
    Ok(builder.build())
}

/// One manager per subsystem, ready for `DispatcherBuilder::manager`.
///
/// The directory monitor is passed in because the node also subscribes to
/// its change events.
pub fn default_managers(
    config: Arc<ConfigStore>,
    monitor: Arc<DirectoryMonitor>,
) -> anyhow::Result<Vec<Arc<dyn SubsystemManager>>> {
    let managers: Vec<Arc<dyn SubsystemManager>> = vec![
        Arc::new(FileManager::new(Arc::clone(&config))),
        Arc::new(ProcessManager::new()),
        Arc::new(NetworkManager::new()?),
        Arc::new(SystemManager::new(config)),
        monitor as Arc<dyn SubsystemManager>,
    ];
    Ok(managers)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pcgate_config::ConfigRecord;
    use pcgate_core::{RiskClass, Subsystem};

    use super::*;

    #[test]
    fn registry_builds_without_duplicates() {
        let reg = default_registry().unwrap();
        assert_eq!(reg.len(), table().len());
    }

    #[test]
    fn destructive_set_is_exactly_the_dangerous_commands() {
        let reg = default_registry().unwrap();
        let destructive: BTreeSet<&str> = reg
            .descriptors()
            .into_iter()
            .filter(|d| d.risk == RiskClass::Destructive)
            .map(|d| d.name)
            .collect();
        assert_eq!(destructive, ["delete", "kill", "reboot", "shutdown"].into());
    }

    #[test]
    fn record_backed_features_have_commands() {
        let reg = default_registry().unwrap();
        for name in ["move", "netstat", "startup", "watch", "unwatch", "watches"] {
            assert!(reg.lookup(name).is_some(), "missing {name}");
        }
        assert_eq!(reg.lookup("netstat").map(|d| d.risk), Some(RiskClass::ReadOnly));
        assert_eq!(reg.lookup("watch").map(|d| d.risk), Some(RiskClass::Mutating));
    }

    #[test]
    fn every_subsystem_has_a_manager() {
        let config = Arc::new(ConfigStore::in_memory(ConfigRecord::default()));
        let monitor = Arc::new(DirectoryMonitor::new(Arc::clone(&config)).unwrap());
        let managers = default_managers(config, monitor).unwrap();
        let covered: BTreeSet<Subsystem> = managers.iter().map(|m| m.subsystem()).collect();
        let needed: BTreeSet<Subsystem> =
            default_registry().unwrap().descriptors().iter().map(|d| d.subsystem).collect();
        assert!(needed.is_subset(&covered));
        assert_eq!(covered, Subsystem::ALL.into());
    }
}
