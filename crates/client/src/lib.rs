// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client core for the TrueNAS JSON-RPC 2.0 WebSocket API.

/// Debug-level event gated on a runtime flag (`enable_debug_logging`).
macro_rules! diag {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::debug!($($arg)+)
        }
    };
}

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod jobs;
pub mod registry;
pub mod session;
pub mod socket;
pub mod test_support;
mod tls;

pub use client::{CallResult, ClientBuilder, TrueNasClient};
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use error::{ClientError, Result};
