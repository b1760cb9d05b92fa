// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Call dispatcher: the public entry point of the client.
//!
//! A call connects if needed, registers a slot, sends the request frame and
//! waits for the correlated response. Error responses from ordinary methods
//! are checked against the [`ReauthPolicy`] before being surfaced.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::codec::{self, ErrorObject};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::credential::{CredentialStore, MemoryCredentialStore};
use crate::error::{ClientError, Result};
use crate::registry::RequestRegistry;
use crate::session::ReauthPolicy;
use crate::socket::{Connector, WebSocketConnector};

/// Liveness method answered locally when ping is disabled.
pub const PING_METHOD: &str = "core.ping";

/// Methods sent without first driving the connection to `Connected`.
pub const LOGIN_METHODS: [&str; 5] = [
    "auth.login",
    "auth.login_ex",
    "auth.login_with_api_key",
    "auth.login_with_token",
    "auth.generate_token",
];

pub fn is_login_method(method: &str) -> bool {
    LOGIN_METHODS.contains(&method)
}

/// Value-based outcome of [`TrueNasClient::call_with_result`].
#[derive(Debug, Clone, Default)]
pub enum CallResult<T> {
    Success(T),
    Error { message: String, cause: Option<ClientError> },
    #[default]
    Loading,
}

impl<T> CallResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// Handle to one TrueNAS server. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct TrueNasClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ClientConfig>,
    connection: Arc<Connection>,
    registry: Arc<RequestRegistry>,
    credentials: Arc<dyn CredentialStore>,
    reauth: ReauthPolicy,
    /// Number of `call_with_result` calls in flight.
    loading: watch::Sender<usize>,
}

pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    reauth: ReauthPolicy,
}

impl ClientBuilder {
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn reauth_policy(mut self, policy: ReauthPolicy) -> Self {
        self.reauth = policy;
        self
    }

    /// Validate the configuration and assemble the client. Does not connect.
    pub fn build(self) -> anyhow::Result<TrueNasClient> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let registry = RequestRegistry::new();
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector),
        };
        let connection = Connection::new(Arc::clone(&config), connector, Arc::clone(&registry));
        let credentials: Arc<dyn CredentialStore> = match self.credentials {
            Some(store) => store,
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let (loading, _) = watch::channel(0);
        Ok(TrueNasClient {
            inner: Arc::new(Inner {
                config,
                connection,
                registry,
                credentials,
                reauth: self.reauth,
                loading,
            }),
        })
    }
}

impl TrueNasClient {
    /// Client over real WebSockets with in-memory credentials.
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder { config, connector: None, credentials: None, reauth: ReauthPolicy::default() }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    /// Close the socket. Calls still pending fail with [`ClientError::Disconnected`].
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.registry.len()
    }

    /// Invoke `method` with positional `params` and decode the result as `T`.
    ///
    /// Use `()` or `Option<_>` for methods that return nothing.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let debug = self.inner.config.enable_debug_logging;
        if method == PING_METHOD && !self.inner.config.enable_ping {
            diag!(debug, "ping disabled, answering locally");
            return codec::decode_result(Some(Value::String("pong".to_owned())))
                .or_else(|_| codec::decode_result(Some(Value::Bool(true))));
        }

        let login = is_login_method(method);
        if login {
            // Queued on the opening socket; never waits for `Connected`.
            self.inner.connection.ensure_socket();
        } else if !self.is_connected() {
            if let Err(e) = self.inner.connection.connect().await {
                let cause = match e {
                    ClientError::Transport(cause) => cause,
                    other => other.to_string(),
                };
                return Err(ClientError::transport(format!("cannot connect: {cause}")));
            }
        }

        // Dropping `pending` on any early return or cancellation frees the slot.
        let pending = self.inner.registry.register()?;
        let id = pending.id();
        diag!(debug, id, method, "call");
        self.inner.connection.send(codec::encode(id, method, &params))?;

        let response = pending.wait().await?;
        if let Some(error) = response.error {
            return Err(self.reject(method, login, error));
        }
        diag!(debug, id, method, "call ok");
        codec::decode_result(response.result)
    }

    /// Like [`call`](Self::call), but reports failure as a value and marks the
    /// client as loading while the call is in flight.
    pub async fn call_with_result<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> CallResult<T> {
        let _loading = LoadingGuard::enter(&self.inner.loading);
        match self.call(method, params).await {
            Ok(value) => CallResult::Success(value),
            Err(e) => CallResult::Error { message: e.to_string(), cause: Some(e) },
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow() > 0
    }

    /// Observe the number of `call_with_result` calls in flight.
    pub fn watch_loading(&self) -> watch::Receiver<usize> {
        self.inner.loading.subscribe()
    }

    fn reject(&self, method: &str, login: bool, error: ErrorObject) -> ClientError {
        if !login && self.inner.reauth.is_session_invalid(&error) {
            let (code, message) = error.normalized();
            warn!(method, code, message = %message, "session expired");
            self.invalidate_session();
            return ClientError::SessionExpired { code, message };
        }
        let error = error.into_error();
        diag!(self.inner.config.enable_debug_logging, method, err = %error, "call failed");
        error
    }

    /// Drop every cached credential: token, api key and session.
    fn invalidate_session(&self) {
        let store = &self.inner.credentials;
        if let Err(e) = store.clear_auth_token() {
            warn!(err = %e, "failed to clear auth token");
        }
        if let Err(e) = store.clear_api_key() {
            warn!(err = %e, "failed to clear api key");
        }
        if let Err(e) = store.clear_session() {
            warn!(err = %e, "failed to clear session");
        }
    }
}

struct LoadingGuard<'a> {
    loading: &'a watch::Sender<usize>,
}

impl<'a> LoadingGuard<'a> {
    fn enter(loading: &'a watch::Sender<usize>) -> Self {
        loading.send_modify(|n| *n += 1);
        Self { loading }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
