// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Operator allow-list: who may issue chat commands?
//!
//! **Default: deny all.** An empty list never means "everyone". The only
//! exception is the configured owner identity, which is always allowed and
//! never written to the persisted record.
//!
//! Membership lives in the persisted configuration record, so every edit
//! goes through [`ConfigStore::update`] and is written atomically. Readers
//! work on a snapshot and never see a half-applied edit.
//!
//! ```rust
//! # use std::sync::Arc;
//! # use pcgate_config::{ConfigRecord, ConfigStore, OperatorId};
//! # use pcgate_core::AllowList;
//! let store = Arc::new(ConfigStore::in_memory(ConfigRecord::default()));
//! let list = AllowList::new(store, None);
//! assert!(!list.is_allowed(&OperatorId::Numeric(42)));
//! ```

use std::sync::Arc;

use tracing::info;

use pcgate_config::{ConfigStore, OperatorId};

#[derive(Clone)]
pub struct AllowList {
    config: Arc<ConfigStore>,
    owner: Option<OperatorId>,
}

impl AllowList {
    pub fn new(config: Arc<ConfigStore>, owner: Option<OperatorId>) -> Self {
        Self { config, owner }
    }

    pub fn owner(&self) -> Option<&OperatorId> {
        self.owner.as_ref()
    }

    pub fn is_allowed(&self, id: &OperatorId) -> bool {
        if self.owner.as_ref() == Some(id) {
            return true;
        }
        self.config.snapshot().allowed_user_ids.contains(id)
    }

    /// Add `id`. Returns `false` when it was already present.
    pub fn add(&self, id: OperatorId) -> anyhow::Result<bool> {
        let label = id.to_string();
        let added = self.config.update(move |r| r.allowed_user_ids.insert(id))?;
        if added {
            info!(operator = %label, "operator added to allow-list");
        }
        Ok(added)
    }

    /// Remove `id`. Returns `false` when it was not present.
    pub fn remove(&self, id: &OperatorId) -> anyhow::Result<bool> {
        let removed = self.config.update(|r| r.allowed_user_ids.remove(id))?;
        if removed {
            info!(operator = %id, "operator removed from allow-list");
        }
        Ok(removed)
    }

    /// Persisted members in stable order (the owner is not included).
    pub fn list(&self) -> Vec<OperatorId> {
        self.config.snapshot().allowed_user_ids.iter().cloned().collect()
    }
}

impl std::fmt::Debug for AllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowList")
            .field("owner", &self.owner)
            .field("members", &self.config.snapshot().allowed_user_ids.len())
            .finish()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pcgate_config::ConfigRecord;

    use super::*;

    fn list(owner: Option<OperatorId>) -> AllowList {
        AllowList::new(Arc::new(ConfigStore::in_memory(ConfigRecord::default())), owner)
    }

    #[test]
    fn empty_list_denies_everyone() {
        let l = list(None);
        assert!(!l.is_allowed(&OperatorId::Numeric(1)));
        assert!(!l.is_allowed(&OperatorId::Name("alice".into())));
    }

    #[test]
    fn owner_is_allowed_but_not_persisted() {
        let l = list(Some(OperatorId::Numeric(7)));
        assert!(l.is_allowed(&OperatorId::Numeric(7)));
        assert!(!l.is_allowed(&OperatorId::Numeric(8)));
        assert!(l.list().is_empty());
    }

    #[test]
    fn add_and_remove_round_trip() {
        let l = list(None);
        assert!(l.add(OperatorId::Numeric(5)).unwrap());
        assert!(!l.add(OperatorId::Numeric(5)).unwrap());
        assert!(l.is_allowed(&OperatorId::Numeric(5)));
        assert!(l.remove(&OperatorId::Numeric(5)).unwrap());
        assert!(!l.remove(&OperatorId::Numeric(5)).unwrap());
        assert!(!l.is_allowed(&OperatorId::Numeric(5)));
    }

    #[test]
    fn numeric_and_name_ids_are_distinct() {
        let l = list(None);
        l.add(OperatorId::Name("42".into())).unwrap();
        assert!(!l.is_allowed(&OperatorId::Numeric(42)));
    }

    #[test]
    fn edits_persist_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let l = AllowList::new(Arc::new(ConfigStore::open(&path).unwrap()), None);
        l.add(OperatorId::Numeric(99)).unwrap();

        let reopened = AllowList::new(Arc::new(ConfigStore::open(&path).unwrap()), None);
        assert_eq!(reopened.list(), vec![OperatorId::Numeric(99)]);
    }
}
