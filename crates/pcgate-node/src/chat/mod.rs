// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Chat front-end: Telegram long polling in, dispatcher replies out.
//!
//! ```text
//!  getUpdates (long poll) ──► parse ──► Dispatcher::handle ──► render ──► sendMessage
//!        ▲                                                                   │
//!        └──────────────── offset = last update_id + 1 ◄─────────────────────┘
//! ```
//!
//! Each message is answered in its own task so a slow command never holds
//! up the poll loop. Transport failures back off exponentially up to a
//! minute and the loop keeps going.

pub mod parse;
pub mod render;
pub mod telegram;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use pcgate_config::OperatorId;
use pcgate_core::{AllowList, DispatchRequest, Dispatcher};
use pcgate_managers::WatchEvent;

pub use parse::{parse, ChatCommand};
pub use telegram::{TelegramClient, TelegramError, Update};

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);
/// Editors emit bursts of identical events for one save.
const DUPLICATE_WINDOW: Duration = Duration::from_secs(1);

/// Who sent a message, as far as the chat front-end is concerned.
#[derive(Debug, Clone)]
pub struct Sender {
    pub operator: OperatorId,
    pub display_name: String,
}

/// What to do after handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// The incoming message carried a password and should be deleted.
    pub scrub: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Reply { text: text.into(), scrub: false }
    }
}

/// Answer one chat message. `None` means stay silent.
pub async fn respond(dispatcher: &Dispatcher, sender: &Sender, text: &str) -> Option<Reply> {
    let command = parse(text)?;
    let operator = &sender.operator;

    let reply = match command {
        ChatCommand::Start => Reply::text(render::welcome(
            &sender.display_name,
            dispatcher.allowlist().is_allowed(operator),
            dispatcher.chat_enrollment(),
        )),
        ChatCommand::Help => match dispatcher.chat_help(operator).outcome {
            Ok(_) => Reply::text(render::help(dispatcher.registry())),
            Err(_) => Reply::text(render::ACCESS_DENIED),
        },
        ChatCommand::Auth { password: None } => {
            if dispatcher.chat_enrollment() {
                Reply::text("Usage: /auth <password>")
            } else {
                Reply::text(render::ACCESS_DENIED)
            }
        }
        ChatCommand::Auth { password: Some(password) } => {
            let result = dispatcher.enroll_chat(operator, &password).await;
            let text = match &result.outcome {
                Ok(_) => "Authenticated. Send /help for the command list.".to_string(),
                Err(e) => render::error(e, None),
            };
            Reply { text, scrub: true }
        }
        ChatCommand::Dispatch { command, args, confirmed } => {
            let request = DispatchRequest::chat(operator.clone(), command.as_str(), args)
                .confirm(confirmed);
            let result = dispatcher.handle(request).await;
            match &result.outcome {
                Ok(payload) => Reply::text(render::payload(payload)),
                Err(e) => Reply::text(render::error(e, dispatcher.registry().lookup(&command))),
            }
        }
    };
    Some(reply)
}

// ── Poll loop ─────────────────────────────────────────────────────────────────

pub struct ChatFrontend {
    client: TelegramClient,
    dispatcher: Dispatcher,
    poll_timeout_secs: u64,
}

impl ChatFrontend {
    pub fn new(client: TelegramClient, dispatcher: Dispatcher, poll_timeout_secs: u64) -> Self {
        Self { client, dispatcher, poll_timeout_secs }
    }

    /// Poll forever. Only returns if the task is cancelled.
    pub async fn run(self) {
        let this = Arc::new(self);
        let mut offset: Option<i64> = None;
        let mut backoff = BACKOFF_START;
        info!("chat front-end polling for updates");

        loop {
            match this.client.get_updates(offset, this.poll_timeout_secs).await {
                Ok(updates) => {
                    backoff = BACKOFF_START;
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        let this = Arc::clone(&this);
                        tokio::spawn(async move { this.handle_update(update).await });
                    }
                }
                Err(e) => {
                    if e.is_credential_rejected() {
                        error!("chat platform rejected the bot credential: {e}");
                    } else {
                        warn!(retry_in = ?backoff, "polling for updates failed: {e}");
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else { return };
        let (Some(from), Some(text)) = (message.from, message.text) else { return };
        let sender = Sender {
            operator: OperatorId::Numeric(from.id),
            display_name: from.first_name,
        };
        debug!(operator = %sender.operator, update_id = update.update_id, "chat message");

        let Some(reply) = respond(&self.dispatcher, &sender, &text).await else { return };
        let chat_id = message.chat.id;
        if reply.scrub {
            if let Err(e) = self.client.delete_message(chat_id, message.message_id).await {
                debug!("could not delete password message: {e}");
            }
        }
        if let Err(e) = self.client.send_message(chat_id, &reply.text).await {
            warn!(chat_id, "sending reply failed: {e}");
        }
    }
}

// ── Directory change notifications ───────────────────────────────────────────

/// Chat ids that receive directory change notices: the owner and every
/// numeric allow-list entry. Username entries have no chat id to send to.
pub fn notice_recipients(allowlist: &AllowList) -> Vec<i64> {
    let mut ids: Vec<i64> = allowlist
        .owner()
        .into_iter()
        .cloned()
        .chain(allowlist.list())
        .filter_map(|id| match id {
            OperatorId::Numeric(n) => Some(n),
            OperatorId::Name(_) => None,
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Forward directory monitor events to the operators until the monitor
/// goes away.
pub async fn forward_watch_events(
    client: TelegramClient,
    allowlist: AllowList,
    mut events: broadcast::Receiver<WatchEvent>,
) {
    let mut last: Option<(String, Instant)> = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "directory change notices dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let text = format!("Directory change: {event}");
        if let Some((prev, at)) = &last {
            if *prev == text && at.elapsed() < DUPLICATE_WINDOW {
                continue;
            }
        }
        for chat_id in notice_recipients(&allowlist) {
            if let Err(e) = client.send_message(chat_id, &text).await {
                warn!(chat_id, "sending directory change notice failed: {e}");
            }
        }
        last = Some((text, Instant::now()));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
