// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::Value;

/// Errors surfaced by [`TrueNasClient`](crate::TrueNasClient) calls.
///
/// Transport failures are connection problems and fail every pending call;
/// the RPC variants fail only the call whose response carried the error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The socket never opened, died, or was absent when a frame was sent.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered the call with an error envelope.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String, data: Option<Value> },

    /// The server no longer accepts the current session; a fresh login is required.
    #[error("session expired ({code}): {message}")]
    SessionExpired { code: i64, message: String },

    /// The result did not match the requested type, or was null where a value is required.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The call was still pending when the client disconnected.
    #[error("call abandoned: client disconnected")]
    Disconnected,
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    /// Server error code for RPC-level failures (session expiry included).
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } | Self::SessionExpired { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
