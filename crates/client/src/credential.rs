// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential storage consumed by the session layer.
//!
//! The client clears the auth token and session when the server invalidates
//! a session, and everything on logout. Storage itself is pluggable: an
//! in-memory store for embedding, and a JSON file store for the CLI.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// The `(server, account, token)` triple identifying a logged-in session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub server_id: String,
    pub account_id: String,
    pub token: String,
}

/// Persisted credential state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionRecord>,
}

/// Credential store the client reads and invalidates.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> StoredCredentials;

    /// Apply `f` to the stored credentials and persist the result.
    fn update(&self, f: &mut dyn FnMut(&mut StoredCredentials)) -> anyhow::Result<()>;

    fn auth_token(&self) -> Option<String> {
        self.load().auth_token
    }

    fn set_auth_token(&self, token: &str) -> anyhow::Result<()> {
        self.update(&mut |c| c.auth_token = Some(token.to_owned()))
    }

    fn clear_auth_token(&self) -> anyhow::Result<()> {
        self.update(&mut |c| c.auth_token = None)
    }

    fn api_key(&self) -> Option<String> {
        self.load().api_key
    }

    fn set_api_key(&self, key: &str) -> anyhow::Result<()> {
        self.update(&mut |c| c.api_key = Some(key.to_owned()))
    }

    fn clear_api_key(&self) -> anyhow::Result<()> {
        self.update(&mut |c| c.api_key = None)
    }

    fn session(&self) -> Option<SessionRecord> {
        self.load().session
    }

    fn set_session(&self, session: SessionRecord) -> anyhow::Result<()> {
        self.update(&mut |c| c.session = Some(session.clone()))
    }

    fn clear_session(&self) -> anyhow::Result<()> {
        self.update(&mut |c| c.session = None)
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: StoredCredentials) -> Self {
        Self { inner: Mutex::new(credentials) }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> StoredCredentials {
        self.inner.lock().clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut StoredCredentials)) -> anyhow::Result<()> {
        f(&mut self.inner.lock());
        Ok(())
    }
}

/// JSON file store with atomic writes. A missing file reads as empty.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// Store at `<state_dir>/credentials.json`.
    pub fn default_location() -> Self {
        Self::new(state_dir().join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> StoredCredentials {
        let _guard = self.lock.lock();
        match load(&self.path) {
            Ok(creds) => creds,
            Err(e) => {
                if self.path.exists() {
                    tracing::warn!(path = %self.path.display(), err = %e, "unreadable credential file");
                }
                StoredCredentials::default()
            }
        }
    }

    fn update(&self, f: &mut dyn FnMut(&mut StoredCredentials)) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut creds = if self.path.exists() { load(&self.path)? } else { StoredCredentials::default() };
        f(&mut creds);
        save(&self.path, &creds)
    }
}

/// Load stored credentials from a JSON file.
pub fn load(path: &Path) -> anyhow::Result<StoredCredentials> {
    let contents = std::fs::read_to_string(path)?;
    let creds: StoredCredentials = serde_json::from_str(&contents)?;
    Ok(creds)
}

/// Save credentials atomically (write tmp + rename), creating the parent directory.
///
/// The temp name carries PID and a counter so concurrent saves never share a
/// temp file.
pub fn save(path: &Path, creds: &StoredCredentials) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(creds)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve the state directory for client data.
///
/// Checks `TRUENAS_STATE_DIR`, then `$XDG_STATE_HOME/truenas`,
/// then `$HOME/.local/state/truenas`.
pub fn state_dir() -> PathBuf {
    state_dir_with(|name| std::env::var(name).ok())
}

fn state_dir_with(get_env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = get_env("TRUENAS_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = get_env("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("truenas");
    }
    if let Some(home) = get_env("HOME") {
        return PathBuf::from(home).join(".local/state/truenas");
    }
    PathBuf::from(".truenas")
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
