// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Host status, power control and login autostart.
//!
//! Power actions shell out to the platform's own tools. The command lines
//! are data so an installation (or a test) can substitute them:
//!
//! ```text
//! lock      loginctl lock-session
//! shutdown  shutdown -h now
//! reboot    shutdown -r now
//! ```
//!
//! `startup on|off` installs or removes an XDG autostart entry
//! (`~/.config/autostart/pcgate.desktop`) and records the choice in
//! `startup_enabled`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use pcgate_config::ConfigStore;
use pcgate_core::{Invocation, Payload, Subsystem, SubsystemManager};

use crate::exec::run_captured;

const POWER_TIMEOUT: Duration = Duration::from_secs(15);

const AUTOSTART_FILE: &str = "pcgate.desktop";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerAction {
    Lock,
    Shutdown,
    Reboot,
}

impl PowerAction {
    fn default_argv(self) -> Vec<String> {
        let argv: &[&str] = match self {
            PowerAction::Lock => &["loginctl", "lock-session"],
            PowerAction::Shutdown => &["shutdown", "-h", "now"],
            PowerAction::Reboot => &["shutdown", "-r", "now"],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }
}

pub struct SystemManager {
    config: Arc<ConfigStore>,
    power: HashMap<PowerAction, Vec<String>>,
    autostart_dir: Option<PathBuf>,
}

impl SystemManager {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let power = [PowerAction::Lock, PowerAction::Shutdown, PowerAction::Reboot]
            .into_iter()
            .map(|a| (a, a.default_argv()))
            .collect();
        let autostart_dir = if cfg!(all(unix, not(target_os = "macos"))) {
            dirs::config_dir().map(|d| d.join("autostart"))
        } else {
            None
        };
        Self { config, power, autostart_dir }
    }

    /// Directory that receives the autostart entry.
    pub fn with_autostart_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.autostart_dir = Some(dir.into());
        self
    }

    /// Replace the command line used for `action`.
    pub fn with_power_command(mut self, action: PowerAction, argv: Vec<String>) -> Self {
        self.power.insert(action, argv);
        self
    }

    async fn power(&self, action: PowerAction) -> anyhow::Result<Payload> {
        let argv = self
            .power
            .get(&action)
            .ok_or_else(|| anyhow::anyhow!("no command configured for {action:?}"))?;
        warn!(?action, "power action requested");
        run_captured(argv, POWER_TIMEOUT).await?;
        Ok(Payload::text(match action {
            PowerAction::Lock => "screen locked",
            PowerAction::Shutdown => "shutdown initiated",
            PowerAction::Reboot => "reboot initiated",
        }))
    }

    async fn startup(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        let state = inv.args.get("state").map(str::to_ascii_lowercase);
        let enable = match state.as_deref() {
            None => {
                let on = self.config.snapshot().startup_enabled;
                return Ok(Payload::text(format!("startup is {}", if on { "on" } else { "off" })));
            }
            Some("on") => true,
            Some("off") => false,
            Some(other) => anyhow::bail!("state must be 'on' or 'off', not '{other}'"),
        };
        let dir = self
            .autostart_dir
            .as_deref()
            .context("autostart is not supported on this platform")?;
        let entry = dir.join(AUTOSTART_FILE);

        if enable {
            let exe = std::env::current_exe().context("locating the pcgate executable")?;
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
            tokio::fs::write(&entry, desktop_entry(&exe))
                .await
                .with_context(|| format!("writing {}", entry.display()))?;
        } else {
            match tokio::fs::remove_file(&entry).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("removing {}", entry.display())))
                }
            }
        }
        self.config.update(|r| r.startup_enabled = enable)?;
        info!(enabled = enable, entry = %entry.display(), "autostart changed");
        Ok(Payload::text(format!("startup {}", if enable { "enabled" } else { "disabled" })))
    }
}

fn desktop_entry(exe: &Path) -> String {
    format!(
        "[Desktop Entry]\nType=Application\nName=pcgate\n\
         Comment=Remote control through chat and a local web API\n\
         Exec=\"{}\" run --unattended\nTerminal=false\nX-GNOME-Autostart-enabled=true\n",
        exe.display()
    )
}

#[async_trait]
impl SubsystemManager for SystemManager {
    fn subsystem(&self) -> Subsystem {
        Subsystem::System
    }

    async fn invoke(&self, inv: &Invocation) -> anyhow::Result<Payload> {
        match inv.command.as_str() {
            "status" => Ok(Payload::json(tokio::task::spawn_blocking(status).await??)),
            "lock" => self.power(PowerAction::Lock).await,
            "shutdown" => self.power(PowerAction::Shutdown).await,
            "reboot" => self.power(PowerAction::Reboot).await,
            "startup" => self.startup(inv).await,
            other => anyhow::bail!("system manager has no command '{other}'"),
        }
    }
}

fn status() -> anyhow::Result<Value> {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut info = json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": cpus,
        "pcgate_version": env!("CARGO_PKG_VERSION"),
    });
    linux::extend(&mut info)?;
    Ok(info)
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs;

    use serde_json::{json, Value};

    pub(super) fn extend(info: &mut Value) -> anyhow::Result<()> {
        let hostname = fs::read_to_string("/proc/sys/kernel/hostname")?.trim().to_string();
        let release = fs::read_to_string("/proc/sys/kernel/osrelease")?.trim().to_string();
        let uptime_secs = fs::read_to_string("/proc/uptime")?
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|s| s as u64);
        let load: Vec<f64> = fs::read_to_string("/proc/loadavg")?
            .split_whitespace()
            .take(3)
            .filter_map(|s| s.parse().ok())
            .collect();
        let meminfo = fs::read_to_string("/proc/meminfo")?;

        let obj = info
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("status is not an object"))?;
        obj.insert("hostname".into(), json!(hostname));
        obj.insert("kernel".into(), json!(release));
        obj.insert("uptime_secs".into(), json!(uptime_secs));
        obj.insert("load_average".into(), json!(load));
        obj.insert("mem_total_mb".into(), json!(mem_kib(&meminfo, "MemTotal").map(|k| k / 1024)));
        obj.insert(
            "mem_available_mb".into(),
            json!(mem_kib(&meminfo, "MemAvailable").map(|k| k / 1024)),
        );
        Ok(())
    }

    pub(super) fn mem_kib(meminfo: &str, key: &str) -> Option<u64> {
        meminfo.lines().find_map(|l| {
            let (k, v) = l.split_once(':')?;
            if k != key {
                return None;
            }
            v.split_whitespace().next()?.parse().ok()
        })
    }
}

#[cfg(not(target_os = "linux"))]
mod linux {
    pub(super) fn extend(_info: &mut serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pcgate_config::ConfigRecord;
    use pcgate_core::CommandArgs;

    use super::*;

    fn inv(command: &str) -> Invocation {
        Invocation { command: command.into(), args: CommandArgs::default(), operator: None }
    }

    fn manager() -> SystemManager {
        SystemManager::new(Arc::new(ConfigStore::in_memory(ConfigRecord::default())))
    }

    fn startup(state: Option<&str>) -> Invocation {
        let args: CommandArgs = state.map(|s| ("state", s)).into_iter().collect();
        Invocation { command: "startup".into(), args, operator: None }
    }

    fn text(p: Payload) -> String {
        match p {
            Payload::Text { text } => text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn startup_toggle_writes_entry_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let autostart = dir.path().join("autostart");
        let m = manager().with_autostart_dir(&autostart);
        let entry = autostart.join(AUTOSTART_FILE);

        assert_eq!(text(m.invoke(&startup(None)).await.unwrap()), "startup is off");

        assert_eq!(text(m.invoke(&startup(Some("ON"))).await.unwrap()), "startup enabled");
        let body = std::fs::read_to_string(&entry).unwrap();
        assert!(body.contains("run --unattended"), "{body}");
        assert!(m.config.snapshot().startup_enabled);
        assert_eq!(text(m.invoke(&startup(None)).await.unwrap()), "startup is on");

        m.invoke(&startup(Some("off"))).await.unwrap();
        assert!(!entry.exists());
        assert!(!m.config.snapshot().startup_enabled);
        // Turning it off twice is harmless.
        m.invoke(&startup(Some("off"))).await.unwrap();
    }

    #[tokio::test]
    async fn startup_rejects_unknown_state() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager().with_autostart_dir(dir.path());
        assert!(m.invoke(&startup(Some("maybe"))).await.is_err());
        assert!(!m.config.snapshot().startup_enabled);
    }

    #[tokio::test]
    async fn status_has_basic_fields() {
        let out = manager().invoke(&inv("status")).await.unwrap();
        let Payload::Json { value } = out else { panic!("expected json") };
        assert_eq!(value["os"], std::env::consts::OS);
        assert!(value["cpus"].as_u64().unwrap() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn meminfo_parsing() {
        let sample = "MemTotal:       16303428 kB\nMemFree:         1234 kB\nMemAvailable:   8000000 kB\n";
        assert_eq!(linux::mem_kib(sample, "MemTotal"), Some(16303428));
        assert_eq!(linux::mem_kib(sample, "MemAvailable"), Some(8000000));
        assert_eq!(linux::mem_kib(sample, "Swap"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn power_commands_are_substitutable() {
        let m = manager()
            .with_power_command(PowerAction::Reboot, vec!["true".into()])
            .with_power_command(PowerAction::Shutdown, vec!["false".into()]);
        assert_eq!(
            m.invoke(&inv("reboot")).await.unwrap(),
            Payload::text("reboot initiated")
        );
        assert!(m.invoke(&inv("shutdown")).await.is_err());
    }
}
