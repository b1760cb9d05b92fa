// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use truenas_rpc::credential::{CredentialStore, FileCredentialStore};
use truenas_rpc::jobs::{JobOutcome, JobPoller};
use truenas_rpc::{ClientError, TrueNasClient};

use crate::config::{parse_params, Command, Config};

pub const EXIT_ERROR: i32 = 1;
pub const EXIT_SESSION_EXPIRED: i32 = 3;

/// Process exit code for a failed run.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ClientError>() {
        Some(e) if e.is_session_expired() => EXIT_SESSION_EXPIRED,
        _ => EXIT_ERROR,
    }
}

/// Build the client from `config` and run its command, writing results to `out`.
pub async fn run(config: Config, out: &mut impl Write) -> anyhow::Result<()> {
    let store = match &config.credentials {
        Some(path) => FileCredentialStore::new(path),
        None => FileCredentialStore::default_location(),
    };
    info!(path = %store.path().display(), "credential store");
    let client = TrueNasClient::builder(config.client.clone()).credentials(Arc::new(store)).build()?;
    let result = execute(&client, &config, out, shutdown_signal()).await;
    client.disconnect();
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(err = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Run one command on an already built client. `shutdown` ends `watch`.
pub async fn execute(
    client: &TrueNasClient,
    config: &Config,
    out: &mut impl Write,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    match &config.command {
        Command::Ping => {
            let alive = client.ping().await?;
            anyhow::ensure!(alive, "server did not answer pong");
            writeln!(out, "pong")?;
        }
        Command::Call { method, params } => {
            let params = parse_params(params)?;
            authenticate(client, config).await?;
            let result: Value = client.call(method, params).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
        }
        Command::Job { method, params, interval_ms, max_attempts } => {
            let params = parse_params(params)?;
            authenticate(client, config).await?;
            let poller = JobPoller::new(client.clone())
                .interval(Duration::from_millis(*interval_ms))
                .max_attempts(*max_attempts);
            match poller.call_job(method, params).await? {
                JobOutcome::Success(result) => {
                    writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
                }
                JobOutcome::Failed(error) => anyhow::bail!("job failed: {error}"),
                JobOutcome::Aborted => anyhow::bail!("job aborted"),
                JobOutcome::TimedOut => anyhow::bail!("job still running after {max_attempts} polls"),
            }
        }
        Command::Watch { ping_interval_secs } => {
            watch(client, Duration::from_secs(*ping_interval_secs), out, shutdown).await?;
        }
    }
    Ok(())
}

/// Log in with the first available credential: `--api-key`, then
/// `--username`/`--password`, then a stored token, then a stored api key.
///
/// A password login also generates a session token so later runs can
/// resume without the password.
pub async fn authenticate(client: &TrueNasClient, config: &Config) -> anyhow::Result<()> {
    client.connect().await?;

    if let Some(key) = &config.api_key {
        anyhow::ensure!(client.login_with_api_key(key).await?, "api key rejected");
        return Ok(());
    }

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        anyhow::ensure!(client.login(username, password).await?, "login failed for {username}");
        if let Err(e) = client.generate_token(None).await {
            warn!(err = %e, "could not generate session token");
        }
        return Ok(());
    }

    let store = client.credentials();
    if let Some(token) = store.auth_token() {
        if client.login_with_token(&token).await? {
            return Ok(());
        }
        warn!("stored token rejected");
        store.clear_auth_token()?;
    }
    if let Some(key) = store.api_key() {
        if client.login_with_api_key(&key).await? {
            return Ok(());
        }
        warn!("stored api key rejected");
        store.clear_api_key()?;
    }

    anyhow::bail!("no usable credentials: pass --api-key or --username and --password")
}

/// Print every connection state change. Pings periodically, which also
/// reconnects after a drop.
pub async fn watch(
    client: &TrueNasClient,
    ping_interval: Duration,
    out: &mut impl Write,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let mut states = client.watch_state();
    writeln!(out, "{}", *states.borrow_and_update())?;

    let mut ticks = tokio::time::interval(ping_interval);
    let mut shutdown = std::pin::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticks.tick() => {
                let client = client.clone();
                tokio::spawn(async move {
                    let alive = async {
                        client.connect().await?;
                        client.ping().await
                    };
                    match alive.await {
                        Ok(true) => {}
                        Ok(false) => warn!("unexpected ping answer"),
                        Err(e) => warn!(err = %e, "ping failed"),
                    }
                });
            }
            changed = states.changed() => {
                changed?;
                let state = states.borrow_and_update().clone();
                writeln!(out, "{state}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
