// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end tests of a fully assembled node: real settings, a persisted
/// record on disk, the default command table and the real managers.
use std::io::Write;

use pcgate_config::{ConfigStore, Settings};
use pcgate_core::{DispatchError, DispatchRequest, OperatorId, Payload};
use pcgate_node::Node;

const OPERATOR: i64 = 4242;

fn settings_in(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.record_path = dir.path().join("record.json").display().to_string();
    settings.secrets_file = dir.path().join("secrets.env").display().to_string();
    settings.token_env = "PCGATE_TEST_TOKEN_UNSET".into();
    settings
}

fn text(payload: &Payload) -> &str {
    match payload {
        Payload::Text { text } => text,
        other => panic!("expected text payload, got {other:?}"),
    }
}

#[test]
fn default_command_table_is_complete() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::build(settings_in(&dir)).unwrap();
    let registry = node.dispatcher().registry();
    for name in [
        "ls", "cwd", "cd", "delete", "move", "ps", "kill", "ip", "ping", "netstat", "status",
        "shutdown", "startup", "watch", "unwatch", "watches",
    ] {
        assert!(registry.lookup(name).is_some(), "missing command {name}");
    }
}

#[test]
fn build_creates_the_record_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir);
    let path = settings.record_path();
    Node::build(settings).unwrap();
    assert!(path.exists());
    let reopened = ConfigStore::open(&path).unwrap();
    assert!(reopened.snapshot().allowed_user_ids.is_empty());
}

#[tokio::test]
async fn stranger_is_refused_and_nothing_runs() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::build(settings_in(&dir)).unwrap();
    let result = node
        .dispatcher()
        .handle(DispatchRequest::chat(OperatorId::Numeric(OPERATOR), "mkdir", vec![dir
            .path()
            .join("made")
            .display()
            .to_string()]))
        .await;
    assert!(matches!(result.error(), Some(DispatchError::Unauthorized)));
    assert!(!dir.path().join("made").exists());
}

#[tokio::test]
async fn allowed_operator_cd_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();

    let node = Node::build(settings_in(&dir)).unwrap();
    node.dispatcher().allowlist().add(OperatorId::Numeric(OPERATOR)).unwrap();
    let cd = node
        .dispatcher()
        .handle(DispatchRequest::chat(
            OperatorId::Numeric(OPERATOR),
            "cd",
            vec![work.display().to_string()],
        ))
        .await;
    assert!(cd.is_success(), "{:?}", cd.error());
    drop(node);

    // A fresh node reads the same record back.
    let node = Node::build(settings_in(&dir)).unwrap();
    let cwd = node
        .dispatcher()
        .handle(DispatchRequest::chat(OperatorId::Numeric(OPERATOR), "cwd", vec![]))
        .await;
    let payload = cwd.outcome.unwrap();
    assert_eq!(text(&payload), work.display().to_string());
}

#[tokio::test]
async fn destructive_command_waits_for_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let victim = dir.path().join("victim.txt");
    std::fs::File::create(&victim).unwrap().write_all(b"keep me").unwrap();

    let node = Node::build(settings_in(&dir)).unwrap();
    node.dispatcher().allowlist().add(OperatorId::Numeric(OPERATOR)).unwrap();
    let request = DispatchRequest::chat(
        OperatorId::Numeric(OPERATOR),
        "delete",
        vec![victim.display().to_string()],
    );

    let first = node.dispatcher().handle(request.clone()).await;
    assert!(matches!(first.error(), Some(DispatchError::ConfirmationRequired { .. })));
    assert!(victim.exists());

    let second = node.dispatcher().handle(request.confirm(true)).await;
    assert!(second.is_success(), "{:?}", second.error());
    assert!(!victim.exists());
}

#[test]
fn settings_file_overrides_defaults() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "web:\n  bind: \"127.0.0.1:9999\"\nchat:\n  enabled: false").unwrap();
    let settings = pcgate_config::load(Some(f.path())).unwrap();
    assert_eq!(settings.web.bind, "127.0.0.1:9999");
    assert!(!settings.chat.enabled);
    assert!(settings.web.enabled);
}

#[tokio::test]
async fn watched_directory_is_rearmed_after_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("watched");
    std::fs::create_dir(&watched).unwrap();
    let key = watched.canonicalize().unwrap().display().to_string();

    let node = Node::build(settings_in(&dir)).unwrap();
    node.dispatcher().allowlist().add(OperatorId::Numeric(OPERATOR)).unwrap();
    let watch = node
        .dispatcher()
        .handle(DispatchRequest::chat(OperatorId::Numeric(OPERATOR), "watch", vec![key.clone()]))
        .await;
    assert!(watch.is_success(), "{:?}", watch.error());
    drop(node);

    let node = Node::build(settings_in(&dir)).unwrap();
    assert_eq!(node.monitor().watched(), vec![key.clone()]);
    let listed = node
        .dispatcher()
        .handle(DispatchRequest::chat(OperatorId::Numeric(OPERATOR), "watches", vec![]))
        .await;
    assert_eq!(text(&listed.outcome.unwrap()), key);
}
