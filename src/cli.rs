// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use pcgate_config::OperatorId;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pcgate",
    about = "Remote control of this machine through a chat bot and a local web API",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Settings file layered over the discovered ones
    #[arg(long, short = 'c', global = true, env = "PCGATE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Never prompt for the bot token; skip the chat front-end instead
    #[arg(long, global = true)]
    pub unattended: bool,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the chat and web front-ends (default)
    Run,
    /// Add an operator to the chat allow-list
    Allow {
        /// Numeric chat user id or user name
        id: OperatorId,
    },
    /// Remove an operator from the chat allow-list
    Revoke {
        id: OperatorId,
    },
    /// Print the chat allow-list
    Allowed,
    /// Set the web password. Reads one line from stdin.
    SetPassword,
    /// Print the effective settings and the persisted record, secrets redacted
    ShowSettings,
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Attended runs may prompt for the bot token on the terminal.
    pub fn is_attended(&self) -> bool {
        !self.unattended && crate::is_stdin_tty()
    }
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "pcgate", &mut std::io::stdout());
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
