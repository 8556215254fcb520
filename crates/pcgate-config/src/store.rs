// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `ConfigStore` — the single owner of the persisted [`ConfigRecord`].
//!
//! # Concurrency
//!
//! Readers call [`ConfigStore::snapshot`] and get an `Arc` to an immutable
//! record. Writers go through [`ConfigStore::update`], which is serialised by
//! a dedicated mutex, mutates a private copy, persists it, and only then
//! publishes the new `Arc`. A reader therefore sees either the old record or
//! the new one, never a half-applied edit.
//!
//! # Durability
//!
//! Writes go to a temporary file in the same directory, are fsynced, and are
//! renamed over the target. A crash mid-write leaves the previous file
//! intact. On Unix the file is created with mode `0o600`.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use anyhow::Context;
use tracing::{debug, info};

use crate::record::ConfigRecord;

pub struct ConfigStore {
    /// `None` → in-memory only.
    path: Option<PathBuf>,
    current: RwLock<Arc<ConfigRecord>>,
    writer: Mutex<()>,
}

impl ConfigStore {
    /// Open the record at `path`.
    ///
    /// A missing file is replaced by the empty template (written atomically).
    /// A file that exists but does not parse is an error: it is never
    /// silently overwritten.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let record = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<ConfigRecord>(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            info!(path = %path.display(), "no configuration record yet, writing empty template");
            let template = ConfigRecord::default();
            write_atomic(path, &template)?;
            template
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            current: RwLock::new(Arc::new(record)),
            writer: Mutex::new(()),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(record: ConfigRecord) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(record)),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current record. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<ConfigRecord> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Apply `f` to a copy of the record, persist it, then publish it.
    ///
    /// If persisting fails the published record is left unchanged and the
    /// error is returned.
    pub fn update<R>(&self, f: impl FnOnce(&mut ConfigRecord) -> R) -> anyhow::Result<R> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut next = (*self.snapshot()).clone();
        let out = f(&mut next);

        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
            debug!(path = %path.display(), "configuration record persisted");
        }

        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
        Ok(out)
    }
}

/// Serialize `record` and atomically replace `path` with it.
fn write_atomic(path: &Path, record: &ConfigRecord) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(record).context("serializing configuration record")?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("creating dir {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .context("restricting temp file permissions")?;
    }

    tmp.write_all(json.as_bytes())
        .context("writing configuration record")?;
    tmp.as_file().sync_all().context("syncing configuration record")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
