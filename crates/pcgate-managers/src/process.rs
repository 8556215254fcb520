// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Process listing, inspection, launch and termination.
//!
//! The process table is read from `/proc` on Linux. Other platforms get an
//! error for `ps` and `proc`; `run` and `kill` work on any Unix.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{info, warn};

use pcgate_core::{Invocation, Payload, Subsystem, SubsystemManager};

const DEFAULT_PS_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub pid: u32,
    pub name: String,
    pub state: String,
    pub rss_kib: u64,
}

#[derive(Default)]
pub struct ProcessManager;

impl ProcessManager {
    pub fn new() -> Self {
        Self
    }

    async fn ps(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let limit = match inv.args.integer("limit")? {
            Some(n) if n > 0 => n as usize,
            Some(_) => anyhow::bail!("limit must be positive"),
            None => DEFAULT_PS_LIMIT,
        };
        let mut procs = tokio::task::spawn_blocking(procfs::list).await??;
        procs.sort_by(|a, b| b.rss_kib.cmp(&a.rss_kib));
        let total = procs.len();
        procs.truncate(limit);

        let mut out = format!("{total} processes, top {} by memory\n", procs.len());
        for p in &procs {
            out.push_str(&format!(
                "{:>7}  {:>9.1} MB  {}  {}\n",
                p.pid,
                p.rss_kib as f64 / 1024.0,
                p.state,
                p.name
            ));
        }
        Ok(Payload::text(out.trim_end()))
    }

    async fn proc(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let pid = pid_arg(inv)?;
        let detail = tokio::task::spawn_blocking(move || procfs::detail(pid)).await??;
        Ok(Payload::json(detail))
    }

    async fn run(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let path = inv.args.require("path")?;
        let args: Vec<&str> = inv.args.get("args").map(|a| a.split_whitespace().collect()).unwrap_or_default();

        let mut cmd = Command::new(path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        unsafe {
            // Detach from our session so the child outlives the service.
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        let child = cmd.spawn().map_err(|e| anyhow::anyhow!("starting {path}: {e}"))?;
        let pid = child.id().unwrap_or_default();
        info!(%path, pid, "process started");
        Ok(Payload::json(json!({ "pid": pid, "path": path })))
    }

    async fn kill(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let pid = pid_arg(inv)?;
        if pid == 1 || pid == std::process::id() {
            anyhow::bail!("refusing to signal pid {pid}");
        }
        signal_terminate(pid)?;
        warn!(pid, "process terminated");
        Ok(Payload::text(format!("sent SIGTERM to {pid}")))
    }
}

#[async_trait]
impl SubsystemManager for ProcessManager {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Process
    }

    async fn invoke(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        match inv.command.as_str() {
            "ps" => self.ps(inv).await,
            "proc" => self.proc(inv).await,
            "run" => self.run(inv).await,
            "kill" => self.kill(inv).await,
            other => anyhow::bail!("process manager has no command '{other}'"),
        }
    }
}

fn pid_arg(inv: &Invocation) -> anyhow::Result<u32> {
    let pid = inv
        .args
        .integer("pid")?
        .ok_or_else(|| anyhow::anyhow!("pid is required"))?;
    // kill(2) treats 0 as "our own process group".
    match u32::try_from(pid) {
        Ok(0) | Err(_) => anyhow::bail!("invalid pid {pid}"),
        Ok(pid) => Ok(pid),
    }
}

#[cfg(unix)]
fn signal_terminate(pid: u32) -> anyhow::Result<()> {
    let pid = libc::pid_t::try_from(pid)?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) -> anyhow::Result<()> {
    anyhow::bail!("process termination is not supported on this platform")
}

#[cfg(target_os = "linux")]
mod procfs {
    use std::fs;

    use anyhow::Context;
    use serde_json::{json, Value};

    use super::ProcessSummary;

    pub(super) fn list() -> anyhow::Result<Vec<ProcessSummary>> {
        let mut out = Vec::new();
        for entry in fs::read_dir("/proc").context("reading /proc")? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes can exit between readdir and read.
            if let Ok(status) = fs::read_to_string(entry.path().join("status")) {
                out.push(summary(pid, &status));
            }
        }
        Ok(out)
    }

    pub(super) fn detail(pid: u32) -> anyhow::Result<Value> {
        let base = format!("/proc/{pid}");
        let status = fs::read_to_string(format!("{base}/status"))
            .with_context(|| format!("no such process {pid}"))?;
        let s = summary(pid, &status);
        let cmdline = fs::read(format!("{base}/cmdline"))
            .map(|raw| {
                raw.split(|b| *b == 0)
                    .filter(|p| !p.is_empty())
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let exe = fs::read_link(format!("{base}/exe"))
            .ok()
            .map(|p| p.display().to_string());
        Ok(json!({
            "pid": s.pid,
            "name": s.name,
            "state": s.state,
            "rss_mb": (s.rss_kib as f64 / 1024.0 * 10.0).round() / 10.0,
            "uid": field(&status, "Uid").and_then(|v| v.split_whitespace().next().map(str::to_string)),
            "threads": field(&status, "Threads").and_then(|v| v.parse::<u64>().ok()),
            "exe": exe,
            "cmdline": cmdline,
        }))
    }

    fn summary(pid: u32, status: &str) -> ProcessSummary {
        ProcessSummary {
            pid,
            name: field(status, "Name").unwrap_or("?").to_string(),
            state: field(status, "State")
                .and_then(|s| s.split_whitespace().next())
                .unwrap_or("?")
                .to_string(),
            rss_kib: field(status, "VmRSS")
                .and_then(|v| v.split_whitespace().next())
                .and_then(|n| n.parse().ok())
                .unwrap_or(0),
        }
    }

    fn field<'a>(status: &'a str, key: &str) -> Option<&'a str> {
        status.lines().find_map(|l| {
            let (k, v) = l.split_once(':')?;
            (k == key).then(|| v.trim())
        })
    }
}

#[cfg(not(target_os = "linux"))]
mod procfs {
    use serde_json::Value;

    use super::ProcessSummary;

    pub(super) fn list() -> anyhow::Result<Vec<ProcessSummary>> {
        anyhow::bail!("process listing is only supported on Linux")
    }

    pub(super) fn detail(_pid: u32) -> anyhow::Result<Value> {
        anyhow::bail!("process inspection is only supported on Linux")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
