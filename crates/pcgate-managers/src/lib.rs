// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Subsystem managers, the directory monitor and the default command table.
//!
//! Nothing here checks who is asking. Managers are only reachable through
//! `pcgate_core::Dispatcher`, which has already authenticated the caller,
//! validated the arguments and enforced the command's risk class.

pub mod commands;
mod exec;
pub mod file;
pub mod monitor;
pub mod network;
pub mod process;
pub mod system;

pub use commands::{default_managers, default_registry};
pub use file::FileManager;
pub use monitor::{ChangeKind, DirectoryMonitor, WatchEvent};
pub use network::NetworkManager;
pub use process::ProcessManager;
pub use system::{PowerAction, SystemManager};
