// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use truenas_rpc::ClientConfig;

/// Command-line client for the TrueNAS middleware API.
#[derive(Debug, Parser)]
#[command(name = "tnctl", version, about)]
pub struct Config {
    #[command(flatten)]
    pub client: ClientConfig,

    /// API key for `auth.login_with_api_key`.
    #[arg(long, env = "TRUENAS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Account name for password login.
    #[arg(long, env = "TRUENAS_USERNAME")]
    pub username: Option<String>,

    /// Password for password login.
    #[arg(long, env = "TRUENAS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Credential file. Defaults to `credentials.json` in the state directory.
    #[arg(long, env = "TRUENAS_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "TNCTL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TNCTL_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check that the server answers `core.ping`.
    Ping,

    /// Call a method and print its result as JSON.
    Call {
        method: String,
        /// Positional parameters, each a JSON value.
        params: Vec<String>,
    },

    /// Start a job-returning method and wait for the job to finish.
    Job {
        method: String,
        /// Positional parameters, each a JSON value.
        params: Vec<String>,

        /// Delay between status polls in milliseconds.
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,

        /// Give up after this many polls.
        #[arg(long, default_value_t = 300)]
        max_attempts: u32,
    },

    /// Print connection state changes until interrupted.
    Watch {
        /// Seconds between liveness pings.
        #[arg(long, default_value_t = 30)]
        ping_interval_secs: u64,
    },
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.client.validate()?;
        match (&self.username, &self.password) {
            (Some(_), None) => anyhow::bail!("--username requires --password"),
            (None, Some(_)) => anyhow::bail!("--password requires --username"),
            _ => {}
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        match &self.command {
            Command::Job { interval_ms: 0, .. } => anyhow::bail!("--interval-ms must be greater than zero"),
            Command::Watch { ping_interval_secs: 0 } => {
                anyhow::bail!("--ping-interval-secs must be greater than zero")
            }
            _ => Ok(()),
        }
    }
}

/// Parse positional parameters, each as one JSON value.
pub fn parse_params(raw: &[String]) -> anyhow::Result<Vec<Value>> {
    raw.iter()
        .enumerate()
        .map(|(i, text)| {
            serde_json::from_str(text)
                .map_err(|e| anyhow::anyhow!("param {} is not valid JSON ({e}): {text}", i + 1))
        })
        .collect()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
