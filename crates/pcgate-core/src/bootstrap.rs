// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Attended bootstrap: obtaining the bot credential from a human.
//!
//! Only [`crate::CredentialStore::resolve`] calls into this module, and only
//! when every non-interactive source came up empty *and* the caller passed a
//! [`Prompter`]. Nothing on the dispatch path depends on interactive input.

use tracing::{info, warn};

use crate::credential::{Credential, CredentialError, CredentialSource, CredentialStore};

/// Rejected entries tolerated before giving up.
const MAX_ATTEMPTS: usize = 5;

/// Interactive collaborator that asks the operator for a bot token.
pub trait Prompter: Send + Sync {
    /// Ask for a token. `Ok(None)` means the operator declined.
    fn prompt_token(&self, min_len: usize) -> anyhow::Result<Option<String>>;
}

pub(crate) fn run_attended(
    store: &CredentialStore,
    prompter: &dyn Prompter,
) -> Result<Credential, CredentialError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let Some(candidate) = prompter
            .prompt_token(store.min_len())
            .map_err(CredentialError::Prompt)?
        else {
            return Err(CredentialError::NotConfigured);
        };
        let candidate = candidate.trim();

        if !store.validate_shape(candidate) {
            warn!(attempt, "entered bot token looks malformed");
            continue;
        }

        let cred = Credential::new(candidate, CredentialSource::Interactive);
        // A token that works for this run is still useful when the record
        // is read-only, so a failed save is not fatal.
        match store.persist(&cred) {
            Ok(()) => info!("interactive bot token saved"),
            Err(e) => warn!("could not save interactive bot token: {e}"),
        }
        return Ok(cred);
    }

    Err(CredentialError::NotConfigured)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
