// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Reply text for chat users.
//!
//! Denials all read the same. The chat user never learns whether they are
//! missing from the allow-list or the command does not exist.

use pcgate_core::{CommandDescriptor, CommandRegistry, DispatchError, Payload};

/// Telegram rejects messages over 4096 characters.
pub const MAX_REPLY_CHARS: usize = 4000;

pub const ACCESS_DENIED: &str = "Access denied.";

pub fn payload(p: &Payload) -> String {
    truncate(p.to_plain_text())
}

/// `command` is the descriptor the request named, used for a usage hint.
pub fn error(e: &DispatchError, command: Option<&CommandDescriptor>) -> String {
    match e {
        DispatchError::Unauthorized => ACCESS_DENIED.to_string(),
        DispatchError::RateLimited { retry_after_secs } => {
            format!("Too many attempts. Try again in {retry_after_secs}s.")
        }
        DispatchError::UnknownCommand { name } => {
            format!("Unknown command /{name}. Send /help for the list.")
        }
        DispatchError::ConfirmationRequired { command } => format!(
            "/{command} cannot be undone. Repeat it with \"confirm\" at the end to proceed."
        ),
        DispatchError::InvalidArguments { reason } => {
            let usage = command
                .map(|d| format!("\nUsage: /{}", d.usage()))
                .unwrap_or_default();
            format!("Invalid arguments: {reason}{usage}")
        }
        DispatchError::Timeout => "The operation timed out.".to_string(),
        DispatchError::InternalError => "The operation failed.".to_string(),
        DispatchError::NotConfigured => "The service is not configured.".to_string(),
    }
}

pub fn help(registry: &CommandRegistry) -> String {
    let mut out = String::from("Commands:\n");
    for d in registry.descriptors() {
        out.push_str(&format!("/{} - {} [{}]\n", d.usage(), d.summary, d.risk));
    }
    out.push_str("\nDestructive commands need \"confirm\" as the last word.");
    out
}

pub fn welcome(name: &str, allowed: bool, enrollment: bool) -> String {
    match (allowed, enrollment) {
        (true, _) => format!("Welcome, {name}. Send /help for the command list."),
        (false, true) => format!(
            "Welcome, {name}. You need to authenticate first: /auth <password>"
        ),
        (false, false) => ACCESS_DENIED.to_string(),
    }
}

fn truncate(mut text: String) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(MAX_REPLY_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text.truncate(cut);
    text.push_str("\n…(truncated)");
    text
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
