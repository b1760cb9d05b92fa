// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication helpers layered on [`TrueNasClient::call`].

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::TrueNasClient;
use crate::credential::SessionRecord;
use crate::error::Result;

impl TrueNasClient {
    /// Password login. Records the account for this server on success.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool> {
        let ok: bool = self.call("auth.login", vec![json!(username), json!(password)]).await?;
        if ok {
            info!(user = username, "logged in");
            let session = SessionRecord {
                server_id: self.config().host().to_owned(),
                account_id: username.to_owned(),
                token: String::new(),
            };
            if let Err(e) = self.credentials().set_session(session) {
                warn!(err = %e, "failed to store session");
            }
        }
        Ok(ok)
    }

    /// API key login. Stores the key on success.
    pub async fn login_with_api_key(&self, key: &str) -> Result<bool> {
        let ok: bool = self.call("auth.login_with_api_key", vec![json!(key)]).await?;
        if ok {
            info!("logged in with api key");
            if let Err(e) = self.credentials().set_api_key(key) {
                warn!(err = %e, "failed to store api key");
            }
        }
        Ok(ok)
    }

    /// Resume a session from a previously generated token.
    pub async fn login_with_token(&self, token: &str) -> Result<bool> {
        let ok: bool = self.call("auth.login_with_token", vec![json!(token)]).await?;
        if ok {
            info!("logged in with token");
            if let Err(e) = self.credentials().set_auth_token(token) {
                warn!(err = %e, "failed to store auth token");
            }
        }
        Ok(ok)
    }

    /// Ask the server for a session token and store it as the current one.
    ///
    /// `ttl_secs` of `None` leaves the lifetime to the server default.
    pub async fn generate_token(&self, ttl_secs: Option<u64>) -> Result<String> {
        let params = match ttl_secs {
            Some(ttl) => vec![json!(ttl)],
            None => vec![],
        };
        let token: String = self.call("auth.generate_token", params).await?;

        let server_id = self.config().host().to_owned();
        let stored = self.credentials().update(&mut |creds| {
            creds.auth_token = Some(token.clone());
            let account_id = creds
                .session
                .as_ref()
                .filter(|s| s.server_id == server_id)
                .map(|s| s.account_id.clone())
                .unwrap_or_default();
            creds.session = Some(SessionRecord {
                server_id: server_id.clone(),
                account_id,
                token: token.clone(),
            });
        });
        if let Err(e) = stored {
            warn!(err = %e, "failed to store generated token");
        }
        Ok(token)
    }

    /// End the session: tell the server if connected, forget every stored
    /// credential, and close the socket.
    pub async fn logout(&self) -> Result<()> {
        if self.is_connected() {
            if let Err(e) = self.call::<Value>("auth.logout", vec![]).await {
                warn!(err = %e, "server logout failed");
            }
        }
        let cleared = self.credentials().update(&mut |creds| *creds = Default::default());
        if let Err(e) = cleared {
            warn!(err = %e, "failed to clear credentials");
        }
        self.disconnect();
        info!("logged out");
        Ok(())
    }

    /// Liveness check. Always `true` when ping is disabled in the config.
    pub async fn ping(&self) -> Result<bool> {
        let pong: String = self.call("core.ping", vec![]).await?;
        Ok(pong == "pong")
    }
}
