// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Chat message text → [`ChatCommand`].
//!
//! ```text
//! /ls ~/Downloads            Dispatch { ls, ["~/Downloads"], confirmed: false }
//! /kill 4242 confirm         Dispatch { kill, ["4242"], confirmed: true }
//! /status@my_pc_bot          Dispatch { status, [], confirmed: false }
//! /auth hunter22             Auth { password: Some("hunter22") }
//! hello                      None (not a command)
//! ```
//!
//! Only the last word can confirm, so `/rename confirm x` still renames a
//! file called `confirm`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Help,
    Auth { password: Option<String> },
    Dispatch { command: String, args: Vec<String>, confirmed: bool },
}

const CONFIRM_WORDS: &[&str] = &["confirm", "--confirm"];

pub fn parse(text: &str) -> Option<ChatCommand> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let (head, tail) = match rest.split_once(char::is_whitespace) {
        Some((h, t)) => (h, t.trim()),
        None => (rest, ""),
    };
    // Group chats address commands as `/cmd@botname`.
    let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }

    match name.as_str() {
        "start" => return Some(ChatCommand::Start),
        "help" => return Some(ChatCommand::Help),
        // The password is taken verbatim so it may contain spaces.
        "auth" => {
            let password = (!tail.is_empty()).then(|| tail.to_string());
            return Some(ChatCommand::Auth { password });
        }
        _ => {}
    }

    let mut args: Vec<String> = tail.split_whitespace().map(str::to_string).collect();
    let confirmed = args
        .last()
        .is_some_and(|w| CONFIRM_WORDS.iter().any(|c| w.eq_ignore_ascii_case(c)));
    if confirmed {
        args.pop();
    }
    Some(ChatCommand::Dispatch { command: name, args, confirmed })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
