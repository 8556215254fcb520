// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Settings;

/// Ordered list of settings file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn settings_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/pcgate/settings.yaml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/pcgate/settings.yaml"));
    }

    // 3. Working-directory local
    paths.push(PathBuf::from(".pcgate/settings.yaml"));

    paths
}

/// Load settings by deep-merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--settings` CLI flag);
/// unlike the search paths it must exist.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Settings> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in settings_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading settings layer");
            merge_yaml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit settings");
        merge_yaml(&mut merged, read_layer(p)?);
    }

    serde_yaml::from_value(merged).context("invalid settings")
}

fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let layer: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    // An empty file parses as Null; treat it as an empty layer.
    Ok(match layer {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        other => other,
    })
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        merge_yaml(&mut dst, val("x: 2"));
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        merge_yaml(&mut dst, val("b: 99"));
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_mappings() {
        let mut dst = val("auth:\n  max_failed_attempts: 5\n  session_ttl_secs: 60");
        merge_yaml(&mut dst, val("auth:\n  session_ttl_secs: 10"));
        assert_eq!(dst["auth"]["max_failed_attempts"].as_i64(), Some(5));
        assert_eq!(dst["auth"]["session_ttl_secs"].as_i64(), Some(10));
    }

    #[test]
    fn missing_explicit_path_is_error() {
        let result = load(Some(Path::new("/tmp/pcgate_nonexistent_settings_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "dispatch:\n  timeout_secs: 7\nweb:\n  enabled: false").unwrap();
        let s = load(Some(f.path())).unwrap();
        assert_eq!(s.dispatch.timeout_secs, 7);
        assert!(!s.web.enabled);
        assert_eq!(s.auth.max_failed_attempts, 5);
    }

    #[test]
    fn empty_explicit_file_is_all_defaults() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let s = load(Some(f.path())).unwrap();
        assert_eq!(s.dispatch.timeout_secs, 30);
    }
}
