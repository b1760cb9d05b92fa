// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 wire envelopes.
//!
//! Stateless translation between calls and text frames. Decoding never
//! fails loudly on inbound frames (the socket pump logs and drops them);
//! decoding a *result* into a requested type always fails loudly.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};

/// Protocol version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    pub id: u32,
    pub method: String,
    pub params: Vec<Value>,
}

/// Inbound envelope: a correlated response or a server notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ResponseEnvelope {
    /// Server-pushed message with no caller-issued request behind it.
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// The authoritative `(code, message)` pair.
    ///
    /// TrueNAS wraps the real failure in `data` as `{"error": <errno>,
    /// "reason": <text>, ...}` under a generic outer code. When present, the
    /// inner values win.
    pub fn normalized(&self) -> (i64, String) {
        let inner = self.data.as_ref().and_then(Value::as_object);
        let code = inner.and_then(|d| d.get("error")).and_then(Value::as_i64).unwrap_or(self.code);
        let message = inner
            .and_then(|d| d.get("reason"))
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| self.message.clone());
        (code, message)
    }

    /// Convert into a [`ClientError::Rpc`] using the normalized code and message.
    pub fn into_error(self) -> ClientError {
        let (code, message) = self.normalized();
        ClientError::Rpc { code, message, data: self.data }
    }
}

/// Serialize a call into a request frame.
pub fn encode(id: u32, method: &str, params: &[Value]) -> String {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Parse an inbound frame. Returns `None` for anything that is not a
/// JSON-RPC envelope.
pub fn decode(text: &str) -> Option<ResponseEnvelope> {
    serde_json::from_str(text).ok()
}

/// Best-effort id of a frame that failed to decode as an envelope.
pub fn frame_id(text: &str) -> Option<u32> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("id")?.as_u64()?.try_into().ok()
}

/// Convert an untyped result payload into `T`.
///
/// An absent or null payload succeeds only when `T` itself accepts null
/// (`()`, `Option<_>`, `Value`); otherwise it is a "null result" error.
pub fn decode_result<T: DeserializeOwned>(payload: Option<Value>) -> Result<T> {
    match payload {
        None | Some(Value::Null) => T::deserialize(Value::Null)
            .map_err(|_| ClientError::Deserialization("null result".to_owned())),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| ClientError::Deserialization(e.to_string()))
        }
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
