// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::socket::TrustPolicy;

/// API endpoint appended when the server URL carries no path.
pub const DEFAULT_API_PATH: &str = "/api/current";

/// Connection settings for one client instance.
///
/// Built once per session and never mutated; a different configuration
/// means a different client.
#[derive(Debug, Clone, PartialEq, Eq, clap::Args, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server URL (ws://, wss://, http:// or https://).
    #[arg(long = "url", env = "TRUENAS_URL")]
    pub server_url: String,

    /// Accept any TLS certificate and hostname.
    #[arg(long, env = "TRUENAS_INSECURE")]
    #[serde(default)]
    pub insecure: bool,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "connect-timeout-ms", env = "TRUENAS_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    #[serde(default = "default_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Send real `core.ping` calls. When disabled, ping always succeeds.
    #[arg(long, env = "TRUENAS_ENABLE_PING", default_value_t = true, action = clap::ArgAction::Set)]
    #[serde(default = "default_true")]
    pub enable_ping: bool,

    /// Emit diagnostic logs (frames, dropped responses, notifications).
    #[arg(long = "debug", env = "TRUENAS_DEBUG")]
    #[serde(default)]
    pub enable_debug_logging: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            insecure: false,
            connection_timeout_ms: default_timeout_ms(),
            enable_ping: true,
            enable_debug_logging: false,
        }
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ping(mut self, enable: bool) -> Self {
        self.enable_ping = enable;
        self
    }

    pub fn with_debug_logging(mut self, enable: bool) -> Self {
        self.enable_debug_logging = enable;
        self
    }

    /// Validate the configuration before building a client.
    pub fn validate(&self) -> anyhow::Result<()> {
        const SCHEMES: [&str; 4] = ["ws://", "wss://", "http://", "https://"];
        if !SCHEMES.iter().any(|scheme| self.server_url.starts_with(scheme)) {
            anyhow::bail!("unsupported server url: {:?} (expected ws, wss, http or https)", self.server_url);
        }
        let host = self.server_url.split_once("://").map(|(_, rest)| rest).unwrap_or_default();
        if host.is_empty() || host.starts_with('/') {
            anyhow::bail!("server url has no host: {:?}", self.server_url);
        }
        if self.connection_timeout_ms == 0 {
            anyhow::bail!("connection timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn trust_policy(&self) -> TrustPolicy {
        if self.insecure {
            TrustPolicy::Insecure
        } else {
            TrustPolicy::Verify
        }
    }

    /// The WebSocket endpoint: `http(s)` becomes `ws(s)`, and a bare host
    /// gets [`DEFAULT_API_PATH`].
    pub fn websocket_url(&self) -> String {
        let url = self.server_url.trim_end_matches('/');
        let url = if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url.to_owned()
        };

        let (base, query) = match url.split_once('?') {
            Some((base, query)) => (base.trim_end_matches('/'), Some(query)),
            None => (url.as_str(), None),
        };
        let has_path = base.split_once("://").is_some_and(|(_, rest)| rest.contains('/'));
        let path = if has_path { "" } else { DEFAULT_API_PATH };
        match query {
            Some(query) => format!("{base}{path}?{query}"),
            None => format!("{base}{path}"),
        }
    }

    /// Host part of the server URL, used as the server id for stored sessions.
    pub fn host(&self) -> &str {
        let rest = self.server_url.split_once("://").map(|(_, rest)| rest).unwrap_or(&self.server_url);
        rest.split(['/', '?']).next().unwrap_or(rest)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
