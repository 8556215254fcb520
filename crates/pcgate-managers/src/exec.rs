// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::{process::Stdio, time::Duration};

use anyhow::Context;
use tokio::process::Command;
use tracing::debug;

/// Combined output is cut to this many bytes before it goes back to a chat.
const OUTPUT_LIMIT_BYTES: usize = 3_500;

/// Run `argv` to completion with no stdin and return stdout + stderr.
///
/// A non-zero exit is an error carrying the captured output. The child is
/// killed if `timeout` fires or the caller's task is aborted.
pub(crate) async fn run_captured(argv: &[String], timeout: Duration) -> anyhow::Result<String> {
    let (program, args) = argv.split_first().context("empty command line")?;
    debug!(%program, ?args, "spawning helper command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .with_context(|| format!("{program} did not finish within {}s", timeout.as_secs()))?
        .with_context(|| format!("spawning {program}"))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    let text = truncate(text.trim_end());

    if !output.status.success() {
        anyhow::bail!(
            "{program} exited with {}: {text}",
            output.status.code().map_or("signal".to_string(), |c| c.to_string())
        );
    }
    Ok(text)
}

fn truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }
    let mut end = OUTPUT_LIMIT_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[... {} bytes omitted]", &s[..end], s.len() - end)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("abc"), "abc");
        let long = "x".repeat(OUTPUT_LIMIT_BYTES + 10);
        assert!(truncate(&long).ends_with("[... 10 bytes omitted]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let out = run_captured(&argv(&["echo", "hello"]), Duration::from_secs(5)).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_error() {
        assert!(run_captured(&argv(&["false"]), Duration::from_secs(5)).await.is_err());
    }

    #[tokio::test]
    async fn empty_argv_is_error() {
        assert!(run_captured(&[], Duration::from_secs(1)).await.is_err());
    }
}
