// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Node startup: build the core from [`Settings`], then run the enabled
//! front-ends until shutdown.
//!
//! ```text
//! Settings ─► ConfigStore ─┬─► CredentialStore ──► (chat) TelegramClient
//!                          ├─► AllowList ─────┐
//!                          ├─► SessionGate ───┼─► Dispatcher ─┬─► ChatFrontend
//!                          └─► managers ──────┘               └─► web router
//!                               │
//!                               └─ DirectoryMonitor ──broadcast──► chat notices
//! ```
//!
//! Without a resolvable bot credential the chat front-end is skipped and the
//! web front-end still runs.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use pcgate_config::{ConfigStore, Settings};
use pcgate_core::{
    AllowList, AuditSink, Clock, Credential, CredentialError, CredentialStore, Dispatcher,
    Prompter, SessionGate, SystemClock, TracingAuditSink,
};
use pcgate_managers::{default_managers, default_registry, DirectoryMonitor};

use crate::{
    chat::{self, ChatFrontend, TelegramClient},
    http,
};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub struct Node {
    settings: Settings,
    config: Arc<ConfigStore>,
    credentials: Arc<CredentialStore>,
    dispatcher: Dispatcher,
    monitor: Arc<DirectoryMonitor>,
}

impl Node {
    /// Open the persisted record and assemble the dispatcher.
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        let record_path = settings.record_path();
        let config = Arc::new(
            ConfigStore::open(&record_path)
                .with_context(|| format!("opening {}", record_path.display()))?,
        );
        let credentials = Arc::new(
            CredentialStore::new(
                Arc::clone(&config),
                settings.token_env.clone(),
                settings.auth.min_credential_len,
            )
            .with_secrets_file(settings.secrets_file()),
        );

        let allowlist = AllowList::new(Arc::clone(&config), settings.auth.owner_id.clone());
        let gate = Arc::new(SessionGate::new(
            Arc::clone(&config),
            Arc::new(SystemClock) as Arc<dyn Clock>,
            &settings.auth,
        ));

        let mut builder = Dispatcher::builder(
            default_registry()?,
            allowlist,
            gate,
            Arc::new(TracingAuditSink) as Arc<dyn AuditSink>,
        )
        .timeout(Duration::from_secs(settings.dispatch.timeout_secs))
        .web_identity(settings.auth.web_identity)
        .chat_enrollment(settings.auth.chat_enrollment);
        let monitor = Arc::new(DirectoryMonitor::new(Arc::clone(&config))?);
        for manager in default_managers(Arc::clone(&config), Arc::clone(&monitor))? {
            builder = builder.manager(manager);
        }
        let dispatcher = builder.build()?;

        let node = Self { settings, config, credentials, dispatcher, monitor };
        node.log_posture();
        Ok(node)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn monitor(&self) -> &Arc<DirectoryMonitor> {
        &self.monitor
    }

    fn log_posture(&self) {
        let record = self.config.snapshot();
        if self.settings.web.enabled && record.password.is_empty() {
            warn!("no web password set; web logins will be refused (run `pcgate set-password`)");
        }
        if record.allowed_user_ids.is_empty()
            && self.settings.auth.owner_id.is_none()
            && !self.settings.auth.chat_enrollment
        {
            info!("allow-list is empty; chat commands are refused until an operator is allowed");
        } else {
            info!(count = record.allowed_user_ids.len(), "allow-list loaded");
        }
    }

    /// Resolve the bot credential. `None` when chat has to be skipped.
    async fn resolve_credential(
        &self,
        prompter: Option<Arc<dyn Prompter>>,
    ) -> anyhow::Result<Option<Credential>> {
        let store = Arc::clone(&self.credentials);
        // Attended bootstrap reads stdin.
        let resolved = tokio::task::spawn_blocking(move || store.resolve(prompter.as_deref()))
            .await
            .context("credential resolution task failed")?;
        match resolved {
            Ok(credential) => Ok(Some(credential)),
            Err(CredentialError::NotConfigured) => {
                warn!(
                    env = %self.settings.token_env,
                    "no bot credential configured; chat front-end disabled"
                );
                Ok(None)
            }
            Err(e) => {
                error!("bot credential unavailable, chat front-end disabled: {e}");
                Ok(None)
            }
        }
    }

    /// Run until `shutdown` resolves or the web front-end fails.
    pub async fn run(
        self,
        prompter: Option<Arc<dyn Prompter>>,
        shutdown: impl Future<Output = ()> + Send,
    ) -> anyhow::Result<()> {
        let credential = if self.settings.chat.enabled {
            self.resolve_credential(prompter).await?
        } else {
            info!("chat front-end disabled in settings");
            None
        };

        let mut background: Vec<JoinHandle<()>> = Vec::new();
        background.push(tokio::spawn(purge_sessions(Arc::clone(self.dispatcher.gate()))));

        let chat = &self.settings.chat;
        let mut chat_running = false;
        if let Some(credential) = credential {
            let client = TelegramClient::new(
                &chat.api_base,
                &credential,
                Duration::from_secs(chat.poll_timeout_secs),
            )?;
            background.push(tokio::spawn(chat::forward_watch_events(
                client.clone(),
                self.dispatcher.allowlist().clone(),
                self.monitor.subscribe(),
            )));
            let frontend =
                ChatFrontend::new(client, self.dispatcher.clone(), chat.poll_timeout_secs);
            background.push(tokio::spawn(frontend.run()));
            info!(source = %credential.source(), "chat front-end started");
            chat_running = true;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let web = if self.settings.web.enabled {
            let dispatcher = self.dispatcher.clone();
            let web_settings = self.settings.web.clone();
            Some(tokio::spawn(async move {
                let stopped = async move {
                    let _ = stop_rx.changed().await;
                };
                http::serve(dispatcher, &web_settings, stopped).await
            }))
        } else {
            info!("web front-end disabled in settings");
            None
        };

        if !chat_running && web.is_none() {
            for task in &background {
                task.abort();
            }
            anyhow::bail!("no front-end could start: chat has no credential and web is disabled");
        }

        tokio::pin!(shutdown);
        let web_result = match web {
            Some(mut handle) => tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    let _ = stop_tx.send(true);
                    handle.await
                }
                res = &mut handle => res,
            },
            None => {
                (&mut shutdown).await;
                info!("shutdown requested");
                Ok(Ok(()))
            }
        };

        for task in &background {
            task.abort();
        }
        web_result.map_err(|e| anyhow::anyhow!("web front-end task died: {e}"))?
    }
}

/// Build a node from `settings` and run it until Ctrl-C.
pub async fn run(settings: Settings, prompter: Option<Arc<dyn Prompter>>) -> anyhow::Result<()> {
    let node = Node::build(settings)?;
    node.run(prompter, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await
}

async fn purge_sessions(gate: Arc<SessionGate>) {
    let mut tick = tokio::time::interval(SESSION_PURGE_INTERVAL);
    loop {
        tick.tick().await;
        let purged = gate.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired web sessions removed");
        }
    }
}
