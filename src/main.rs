// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use clap::Parser;
use cli::{Cli, Commands};
use pcgate_config::{ConfigStore, Settings};
use pcgate_core::{AllowList, Clock, Prompter, SessionGate, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Some(Commands::Completions { shell }) = &cli.command {
        cli::print_completions(*shell);
        return Ok(());
    }

    let settings = pcgate_config::load(cli.settings.as_deref())?;
    tracing::debug!(record = %settings.record_path().display(), "settings loaded");

    match &cli.command {
        None | Some(Commands::Run) => {
            let prompter: Option<Arc<dyn Prompter>> = if cli.is_attended() {
                Some(Arc::new(StdinPrompter))
            } else {
                None
            };
            pcgate_node::run(settings, prompter).await
        }
        Some(Commands::Allow { id }) => {
            let allowlist = AllowList::new(open_record(&settings)?, None);
            if allowlist.add(id.clone())? {
                println!("{id} added to the allow-list");
            } else {
                println!("{id} is already on the allow-list");
            }
            Ok(())
        }
        Some(Commands::Revoke { id }) => {
            let allowlist = AllowList::new(open_record(&settings)?, None);
            if allowlist.remove(id)? {
                println!("{id} removed from the allow-list");
            } else {
                println!("{id} was not on the allow-list");
            }
            Ok(())
        }
        Some(Commands::Allowed) => {
            let allowlist = AllowList::new(open_record(&settings)?, settings.auth.owner_id.clone());
            if let Some(owner) = allowlist.owner() {
                println!("{owner} (owner)");
            }
            for id in allowlist.list() {
                println!("{id}");
            }
            Ok(())
        }
        Some(Commands::SetPassword) => set_password(&settings),
        Some(Commands::ShowSettings) => {
            let record = open_record(&settings)?.snapshot().redacted();
            println!("{}", serde_yaml::to_string(&settings).unwrap_or_default());
            println!("# {}", settings.record_path().display());
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Some(Commands::Completions { .. }) => Ok(()),
    }
}

fn open_record(settings: &Settings) -> anyhow::Result<Arc<ConfigStore>> {
    let path = settings.record_path();
    let store = ConfigStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Read the new web password from stdin so it never appears in argv or
/// shell history.
fn set_password(settings: &Settings) -> anyhow::Result<()> {
    if is_stdin_tty() {
        eprint!("New web password (min {} characters): ", settings.auth.min_password_len);
        io::stderr().flush()?;
    }
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("reading password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);

    let gate = SessionGate::new(open_record(settings)?, Arc::new(SystemClock) as Arc<dyn Clock>, &settings.auth);
    gate.change_password(password)?;
    println!("web password updated");
    Ok(())
}

// ── Attended bootstrap ────────────────────────────────────────────────────────

/// Asks for the bot token on the terminal and has the operator confirm a
/// masked echo of it before it is saved.
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt_token(&self, min_len: usize) -> anyhow::Result<Option<String>> {
        let mut err = io::stderr();
        writeln!(err)?;
        writeln!(err, "No bot token found in the environment, secrets file or configuration.")?;
        writeln!(err, "Create a bot with @BotFather and paste its token (empty line to skip).")?;
        write!(err, "Token (min {min_len} characters): ")?;
        err.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let token = line.trim().to_string();
        if token.is_empty() {
            return Ok(None);
        }

        write!(err, "Use {}? [y/N] ", mask(&token))?;
        err.flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            Ok(Some(token))
        } else {
            // Returning a blank candidate makes the bootstrap ask again.
            Ok(Some(String::new()))
        }
    }
}

/// First 10 and last 5 characters, the rest elided.
fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 15 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{head}...{tail}")
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

pub(crate) fn is_stdin_tty() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(io::stdin().as_raw_fd()) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_shows_only_ends() {
        let token = "1234567890:ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghi";
        let masked = mask(token);
        assert_eq!(masked, "1234567890...efghi");
        assert!(!masked.contains("ABCDEF"));
    }

    #[test]
    fn short_input_is_fully_masked() {
        assert_eq!(mask("short"), "*****");
    }
}
