// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Front-ends for the pcgate dispatcher.
//!
//! - [`chat`]: Telegram Bot API long polling.
//! - [`http`]: axum JSON API.
//! - [`node`]: builds the core from settings and runs both.

pub mod chat;
pub mod http;
pub mod node;

pub use node::{run, Node};
