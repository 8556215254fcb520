// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Directory watching.
//!
//! Watched roots live in the persisted record under `monitored_paths` and are
//! re-armed when the node starts. Change events are published on a
//! broadcast channel; the chat front-end subscribes and forwards them to the
//! allow-listed operators.
//!
//! ```text
//! notify thread ──► DirectoryMonitor ──broadcast──► chat notifier
//!                        ▲
//!       watch / unwatch / watches (via the dispatcher)
//! ```

use std::{
    collections::BTreeSet,
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::Context;
use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use pcgate_config::ConfigStore;
use pcgate_core::{Invocation, Payload, Subsystem, SubsystemManager};

use crate::file::resolve_path;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
            ChangeKind::Renamed => "renamed",
        })
    }
}

/// One filesystem change under a watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    /// Affected paths; a rename carries source then destination.
    pub paths: Vec<PathBuf>,
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (i, p) in self.paths.iter().enumerate() {
            let sep = if i == 0 { " " } else { " -> " };
            write!(f, "{sep}{}", p.display())?;
        }
        Ok(())
    }
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    use notify::event::ModifyKind;
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        _ => None,
    }
}

pub struct DirectoryMonitor {
    config: Arc<ConfigStore>,
    watcher: Mutex<RecommendedWatcher>,
    events: broadcast::Sender<WatchEvent>,
}

impl DirectoryMonitor {
    /// Create the OS watcher and re-arm every persisted root that still
    /// exists.
    pub fn new(config: Arc<ConfigStore>) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tx = events.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if let Some(kind) = classify(&event.kind) {
                        // No subscribers is fine.
                        let _ = tx.send(WatchEvent { kind, paths: event.paths });
                    }
                }
                Err(e) => warn!("directory watcher error: {e}"),
            }
        })
        .context("creating directory watcher")?;

        let monitor = Self { config, watcher: Mutex::new(watcher), events };
        monitor.restore();
        Ok(monitor)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Roots currently recorded as watched.
    pub fn watched(&self) -> Vec<String> {
        self.config.snapshot().monitored_paths.clone()
    }

    fn restore(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        for root in self.watched() {
            match watcher.watch(PathBuf::from(&root).as_path(), RecursiveMode::Recursive) {
                Ok(()) => info!(%root, "directory watch restored"),
                // Kept in the record: the path may be a mount that appears later.
                Err(e) => warn!(%root, "cannot restore directory watch: {e}"),
            }
        }
    }

    async fn watch(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let raw = resolve_path(&self.config, inv, inv.args.require("path")?);
        let root = tokio::fs::canonicalize(&raw)
            .await
            .with_context(|| format!("resolving {}", raw.display()))?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            anyhow::bail!("{} is not a directory", root.display());
        }
        let key = root.to_string_lossy().into_owned();
        if self.watched().contains(&key) {
            anyhow::bail!("already watching {key}");
        }

        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {key}"))?;
        let stored = key.clone();
        if let Err(e) = self.config.update(move |r| r.monitored_paths.push(stored)) {
            let _ = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).unwatch(&root);
            return Err(e);
        }
        info!(root = %key, "directory watch started");
        Ok(Payload::text(format!("watching {key}")))
    }

    /// `unwatch <path>` stops one root; without a path every root is dropped.
    async fn unwatch(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let targets: BTreeSet<String> = match inv.args.get("path") {
            Some(p) => {
                let raw = resolve_path(&self.config, inv, p);
                // A deleted root can no longer be canonicalized.
                let root = tokio::fs::canonicalize(&raw).await.unwrap_or(raw);
                let key = root.to_string_lossy().into_owned();
                if !self.watched().contains(&key) {
                    anyhow::bail!("not watching {key}");
                }
                [key].into()
            }
            None => self.watched().into_iter().collect(),
        };

        {
            let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
            for root in &targets {
                if let Err(e) = watcher.unwatch(PathBuf::from(root).as_path()) {
                    debug!(%root, "unwatch: {e}");
                }
            }
        }
        let removed = targets.clone();
        self.config
            .update(move |r| r.monitored_paths.retain(|p| !removed.contains(p)))?;
        info!(count = targets.len(), "directory watches stopped");
        Ok(Payload::text(match targets.len() {
            0 => "no directories were being watched".to_string(),
            1 => format!("stopped watching {}", targets.iter().next().map_or("", String::as_str)),
            n => format!("stopped watching {n} directories"),
        }))
    }
}

#[async_trait]
impl SubsystemManager for DirectoryMonitor {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Monitor
    }

    async fn invoke(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        match inv.command.as_str() {
            "watch" => self.watch(inv).await,
            "unwatch" => self.unwatch(inv).await,
            "watches" => {
                let roots = self.watched();
                Ok(Payload::text(if roots.is_empty() {
                    "no directories are being watched".to_string()
                } else {
                    roots.join("\n")
                }))
            }
            other => anyhow::bail!("monitor has no command '{other}'"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pcgate_config::{ConfigRecord, OperatorId};
    use pcgate_core::CommandArgs;

    use super::*;

    fn inv(command: &str, args: &[(&str, &str)]) -> Invocation {
        Invocation {
            command: command.into(),
            args: args.iter().copied().collect::<CommandArgs>(),
            operator: Some(OperatorId::Numeric(1)),
        }
    }

    fn monitor(record: ConfigRecord) -> DirectoryMonitor {
        DirectoryMonitor::new(Arc::new(ConfigStore::in_memory(record))).unwrap()
    }

    #[test]
    fn event_display_shows_rename_target() {
        let e = WatchEvent {
            kind: ChangeKind::Renamed,
            paths: vec!["/w/a".into(), "/w/b".into()],
        };
        assert_eq!(e.to_string(), "renamed /w/a -> /w/b");
    }

    #[test]
    fn metadata_and_access_events_are_ignored() {
        use notify::event::{AccessKind, CreateKind, MetadataKind, ModifyKind};
        assert_eq!(classify(&EventKind::Create(CreateKind::File)), Some(ChangeKind::Created));
        assert_eq!(classify(&EventKind::Access(AccessKind::Any)), None);
        assert_eq!(classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))), None);
    }

    #[tokio::test]
    async fn watch_persists_and_unwatch_forgets() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap().to_string_lossy().into_owned();
        let m = monitor(ConfigRecord::default());

        m.invoke(&inv("watch", &[("path", root.as_str())])).await.unwrap();
        assert_eq!(m.watched(), vec![root.clone()]);
        assert!(m.invoke(&inv("watch", &[("path", root.as_str())])).await.is_err());

        let Payload::Text { text } = m.invoke(&inv("watches", &[])).await.unwrap() else {
            panic!("expected text")
        };
        assert_eq!(text, root);

        m.invoke(&inv("unwatch", &[("path", root.as_str())])).await.unwrap();
        assert!(m.watched().is_empty());
        assert!(m.invoke(&inv("unwatch", &[("path", root.as_str())])).await.is_err());
    }

    #[tokio::test]
    async fn watch_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("f");
        std::fs::write(&f, "").unwrap();
        let m = monitor(ConfigRecord::default());
        assert!(m.invoke(&inv("watch", &[("path", f.to_str().unwrap())])).await.is_err());
        assert!(m.watched().is_empty());
    }

    #[tokio::test]
    async fn unwatch_without_path_clears_everything() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let m = monitor(ConfigRecord::default());
        for d in [&a, &b] {
            m.invoke(&inv("watch", &[("path", d.path().to_str().unwrap())])).await.unwrap();
        }
        let Payload::Text { text } = m.invoke(&inv("unwatch", &[])).await.unwrap() else {
            panic!("expected text")
        };
        assert_eq!(text, "stopped watching 2 directories");
        assert!(m.watched().is_empty());
    }

    #[tokio::test]
    async fn persisted_roots_are_rearmed_and_report_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let m = monitor(ConfigRecord {
            monitored_paths: vec![root.to_string_lossy().into_owned()],
            ..Default::default()
        });
        let mut rx = m.subscribe();

        std::fs::write(root.join("new.txt"), "hello").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(e) if e.paths.iter().any(|p| p.ends_with("new.txt")) => break e,
                    Ok(_) => continue,
                    Err(e) => panic!("channel closed: {e}"),
                }
            }
        })
        .await
        .expect("no change event for new.txt");
        assert!(matches!(event.kind, ChangeKind::Created | ChangeKind::Modified));
    }
}
