// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Filesystem browsing and file operations.
//!
//! Each operator has a current directory, kept in the persisted record under
//! `current_directories` so it survives restarts. Relative paths resolve
//! against it; `~` expands to the home directory. Web callers without a
//! bound operator share the `web` slot.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use pcgate_config::ConfigStore;
use pcgate_core::{Invocation, Payload, Subsystem, SubsystemManager};

const SHARED_WEB_SLOT: &str = "web";

/// Entries listed by `ls` before the output is cut.
const LIST_LIMIT: usize = 200;

pub struct FileManager {
    config: Arc<ConfigStore>,
}

impl FileManager {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    fn current_dir(&self, inv: &Invocation) -> PathBuf {
        current_dir(&self.config, inv)
    }

    fn resolve(&self, inv: &Invocation, raw: &str) -> PathBuf {
        resolve_path(&self.config, inv, raw)
    }

    fn path_arg(&self, inv: &Invocation, name: &str) -> anyhow::Result<PathBuf> {
        Ok(self.resolve(inv, inv.args.require(name)?))
    }

    async fn ls(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let dir = match inv.args.get("path") {
            Some(p) => self.resolve(inv, p),
            None => self.current_dir(inv),
        };
        let mut rd = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("reading {}", dir.display()))?;

        let mut entries = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            // Entries we cannot stat are skipped.
            let Ok(meta) = entry.metadata().await else { continue };
            entries.push((entry.file_name().to_string_lossy().into_owned(), meta.is_dir(), meta.len()));
        }
        entries.sort_by(|a, b| (!a.1, a.0.to_lowercase()).cmp(&(!b.1, b.0.to_lowercase())));

        let total = entries.len();
        let mut out = format!("{}\n", dir.display());
        for (name, is_dir, size) in entries.iter().take(LIST_LIMIT) {
            if *is_dir {
                out.push_str(&format!("  {name}/\n"));
            } else {
                out.push_str(&format!("  {name}  ({})\n", format_size(*size)));
            }
        }
        if total > LIST_LIMIT {
            out.push_str(&format!("  ... {} more\n", total - LIST_LIMIT));
        }
        if total == 0 {
            out.push_str("  (empty)\n");
        }
        Ok(Payload::text(out.trim_end()))
    }

    async fn cd(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let target = self.path_arg(inv, "path")?;
        let target = tokio::fs::canonicalize(&target)
            .await
            .with_context(|| format!("resolving {}", target.display()))?;
        if !tokio::fs::metadata(&target).await?.is_dir() {
            anyhow::bail!("{} is not a directory", target.display());
        }
        let slot = slot(inv);
        let value = target.to_string_lossy().into_owned();
        self.config
            .update(|r| r.current_directories.insert(slot, value))?;
        debug!(dir = %target.display(), "current directory changed");
        Ok(Payload::text(target.display().to_string()))
    }

    async fn stat(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let path = self.path_arg(inv, "path")?;
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("stat {}", path.display()))?;
        let modified = meta.modified().ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339());
        Ok(Payload::json(json!({
            "path": path.display().to_string(),
            "kind": if meta.is_dir() { "directory" } else if meta.is_file() { "file" } else { "other" },
            "size": meta.len(),
            "size_human": format_size(meta.len()),
            "modified": modified,
            "readonly": meta.permissions().readonly(),
        })))
    }

    async fn mkdir(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let path = self.path_arg(inv, "path")?;
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        info!(path = %path.display(), "directory created");
        Ok(Payload::text(format!("created {}", path.display())))
    }

    async fn rename(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let path = self.path_arg(inv, "path")?;
        let new_name = inv.args.require("new_name")?;
        if new_name.contains(std::path::MAIN_SEPARATOR) || new_name == ".." || new_name == "." {
            anyhow::bail!("new name must be a plain file name");
        }
        let parent = path.parent().context("cannot rename the filesystem root")?;
        let dest = parent.join(new_name);
        if tokio::fs::try_exists(&dest).await? {
            anyhow::bail!("{} already exists", dest.display());
        }
        tokio::fs::rename(&path, &dest)
            .await
            .with_context(|| format!("renaming {}", path.display()))?;
        info!(from = %path.display(), to = %dest.display(), "renamed");
        Ok(Payload::text(format!("renamed to {}", dest.display())))
    }

    async fn copy(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let src = self.path_arg(inv, "path")?;
        let mut dest = self.path_arg(inv, "destination")?;
        if tokio::fs::metadata(&dest).await.map(|m| m.is_dir()).unwrap_or(false) {
            dest = dest.join(src.file_name().context("source has no file name")?);
        }
        if tokio::fs::try_exists(&dest).await? {
            anyhow::bail!("{} already exists", dest.display());
        }
        if dest.starts_with(&src) {
            anyhow::bail!("cannot copy {} into itself", src.display());
        }
        let (s, d) = (src.clone(), dest.clone());
        tokio::task::spawn_blocking(move || copy_recursive(&s, &d)).await??;
        info!(from = %src.display(), to = %dest.display(), "copied");
        Ok(Payload::text(format!("copied to {}", dest.display())))
    }

    async fn move_to(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let src = self.path_arg(inv, "path")?;
        let mut dest = self.path_arg(inv, "destination")?;
        if !tokio::fs::try_exists(&src).await? {
            anyhow::bail!("{} does not exist", src.display());
        }
        if tokio::fs::metadata(&dest).await.map(|m| m.is_dir()).unwrap_or(false) {
            dest = dest.join(src.file_name().context("source has no file name")?);
        }
        let parent = dest.parent().context("destination has no parent directory")?;
        if !tokio::fs::try_exists(parent).await? {
            anyhow::bail!("destination directory {} does not exist", parent.display());
        }
        if tokio::fs::try_exists(&dest).await? {
            anyhow::bail!("{} already exists", dest.display());
        }
        if dest.starts_with(&src) {
            anyhow::bail!("cannot move {} into itself", src.display());
        }

        match tokio::fs::rename(&src, &dest).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                let (s, d) = (src.clone(), dest.clone());
                tokio::task::spawn_blocking(move || {
                    copy_recursive(&s, &d)?;
                    remove_recursive(&s)
                })
                .await??;
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("moving {}", src.display())))
            }
        }
        info!(from = %src.display(), to = %dest.display(), "moved");
        Ok(Payload::text(format!("moved to {}", dest.display())))
    }

    async fn delete(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let path = self.path_arg(inv, "path")?;
        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .with_context(|| format!("stat {}", path.display()))?;
        if meta.is_dir() {
            if path.parent().is_none() {
                anyhow::bail!("refusing to delete the filesystem root");
            }
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        info!(path = %path.display(), "deleted");
        Ok(Payload::text(format!("deleted {}", path.display())))
    }
}

#[async_trait]
impl SubsystemManager for FileManager {
    fn subsystem(&self) -> Subsystem {
        Subsystem::File
    }

    async fn invoke(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        match inv.command.as_str() {
            "ls" => self.ls(inv).await,
            "cwd" => Ok(Payload::text(self.current_dir(inv).display().to_string())),
            "cd" => self.cd(inv).await,
            "stat" => self.stat(inv).await,
            "mkdir" => self.mkdir(inv).await,
            "rename" => self.rename(inv).await,
            "copy" => self.copy(inv).await,
            "move" => self.move_to(inv).await,
            "delete" => self.delete(inv).await,
            other => anyhow::bail!("file manager has no command '{other}'"),
        }
    }
}

fn slot(inv: &Invocation) -> String {
    inv.operator
        .as_ref()
        .map(|o| o.key())
        .unwrap_or_else(|| SHARED_WEB_SLOT.to_string())
}

/// The operator's current directory, falling back to home, then `/`.
fn current_dir(config: &ConfigStore, inv: &Invocation) -> PathBuf {
    config
        .snapshot()
        .current_directories
        .get(&slot(inv))
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Expand `~` and resolve relative paths against the caller's current
/// directory.
pub(crate) fn resolve_path(config: &ConfigStore, inv: &Invocation, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).into_owned());
    if expanded.is_absolute() {
        expanded
    } else {
        current_dir(config, inv).join(expanded)
    }
}

fn copy_recursive(src: &Path, dest: &Path) -> anyhow::Result<()> {
    let meta = std::fs::metadata(src).with_context(|| format!("stat {}", src.display()))?;
    if meta.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(src, dest).with_context(|| format!("copying {}", src.display()))?;
    }
    Ok(())
}

fn remove_recursive(path: &Path) -> anyhow::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// rename(2) cannot cross filesystems; the caller falls back to copying.
fn is_cross_device(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// `1536` → `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
