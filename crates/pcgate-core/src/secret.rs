// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `Secret` — a string that refuses to be printed.
//!
//! `Debug` and `Display` both render `<redacted>`, so a secret that ends up
//! in a `tracing` field or an error message leaks nothing. Call
//! [`Secret::expose`] at the single point where the raw value is needed.

use std::fmt;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// The raw value. Keep the borrow short and never log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare against `candidate` in constant time.
    ///
    /// Both sides are hashed first so the comparison length does not depend
    /// on the secret's length.
    pub fn matches(&self, candidate: &str) -> bool {
        let stored = sha256(self.0.as_bytes());
        let provided = sha256(candidate.as_bytes());
        bool::from(provided.ct_eq(&stored))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for Secret {}

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
