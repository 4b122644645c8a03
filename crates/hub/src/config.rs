// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::connection::Connection;
use crate::error::HubError;
use crate::hub::{ConnHook, ErrorHook, MessageHook};

/// WebSocket hub for the game backend.
#[derive(Debug, Clone, Parser)]
#[command(name = "gamehub", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "GAMEHUB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "GAMEHUB_PORT", default_value_t = 8001)]
    pub port: u16,

    /// Upgrade path served by the hub.
    #[arg(long, env = "GAMEHUB_PATH", default_value = "/")]
    pub path: String,

    /// HS256 secret for verifying client auth tokens.
    #[arg(long, env = "GAMEHUB_WS_SECRET", hide_env_values = true)]
    pub ws_secret: Option<String>,

    /// Promote every connection on its first frame without checking credentials.
    #[arg(long, env = "GAMEHUB_INSECURE_OPEN_AUTH")]
    pub insecure_open_auth: bool,

    /// Close a connection after this many milliseconds without a frame (0 disables).
    #[arg(long, env = "GAMEHUB_IDLE_TIMEOUT_MS", default_value_t = 0)]
    pub idle_timeout_ms: u64,

    /// Maximum inbound message size in bytes.
    #[arg(long, env = "GAMEHUB_MAX_MESSAGE_SIZE")]
    pub max_message_size: Option<usize>,

    /// Origins allowed to upgrade (repeatable). Empty allows every origin.
    #[arg(long = "allowed-origin", env = "GAMEHUB_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Log format (json or text).
    #[arg(long, env = "GAMEHUB_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "GAMEHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.path.starts_with('/') {
            anyhow::bail!("--path must start with '/': {}", self.path);
        }
        let has_secret = self.ws_secret.as_deref().is_some_and(|s| !s.is_empty());
        if !has_secret && !self.insecure_open_auth {
            anyhow::bail!("--ws-secret is required unless --insecure-open-auth is set");
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Hub options derived from flags. Hooks are attached by the caller.
    pub fn hub_options(&self) -> HubOptions {
        HubOptions::new()
            .with_upgrade(UpgradeConfig {
                max_message_size: self.max_message_size,
                allowed_origins: self.allowed_origins.clone(),
            })
            .with_idle_timeout(self.idle_timeout())
            .insecure_open_auth(self.insecure_open_auth)
    }
}

/// Transport upgrade settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeConfig {
    pub max_message_size: Option<usize>,
    /// Empty allows every origin.
    pub allowed_origins: Vec<String>,
}

impl UpgradeConfig {
    pub fn allows_origin(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
    }
}

/// Hooks and settings applied once when a hub is built.
///
/// `on_message`, when set, replaces the hub's built-in frame handling
/// entirely (including auth). `on_connect` and `on_close` run while the
/// registry write lock is held.
#[derive(Clone, Default)]
pub struct HubOptions {
    pub on_connect: Option<ConnHook>,
    pub on_close: Option<ConnHook>,
    pub on_error: Option<ErrorHook>,
    pub on_message: Option<Arc<dyn MessageHook>>,
    pub upgrade: UpgradeConfig,
    pub idle_timeout: Option<Duration>,
    pub insecure_open_auth: bool,
}

impl HubOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_connect(
        mut self,
        hook: impl Fn(&Arc<Connection>) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    pub fn with_on_close(
        mut self,
        hook: impl Fn(&Arc<Connection>) + Send + Sync + 'static,
    ) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    pub fn with_on_error(
        mut self,
        hook: impl Fn(&Arc<Connection>, &HubError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn with_message_hook(mut self, hook: impl MessageHook + 'static) -> Self {
        self.on_message = Some(Arc::new(hook));
        self
    }

    pub fn with_upgrade(mut self, upgrade: UpgradeConfig) -> Self {
        self.upgrade = upgrade;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Open mode: without a message hook, the first frame of every
    /// connection promotes it to `Connected` with no credential check.
    pub fn insecure_open_auth(mut self, enabled: bool) -> Self {
        self.insecure_open_auth = enabled;
        self
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
