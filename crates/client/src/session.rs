// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session invalidation detection.
//!
//! The server ends sessions on its own (token expiry, middleware restart,
//! explicit revocation). That only shows up as an error on the next call, so
//! failed call errors are checked for the invalid-session signature. Either
//! signal is enough: the errno (outer or nested in `data`) or the message text.

use crate::codec::ErrorObject;

/// errno the middleware reports for an unauthenticated or revoked session.
pub const ENOTAUTHENTICATED: i64 = 207;

/// Classifies call errors as session invalidation.
#[derive(Debug, Clone)]
pub struct ReauthPolicy {
    codes: Vec<i64>,
    markers: Vec<String>,
}

impl Default for ReauthPolicy {
    fn default() -> Self {
        Self {
            codes: vec![ENOTAUTHENTICATED],
            markers: vec![
                "invalid session".to_owned(),
                "session expired".to_owned(),
                "not authenticated".to_owned(),
            ],
        }
    }
}

impl ReauthPolicy {
    /// A policy matching only the given codes and message markers.
    pub fn new(codes: Vec<i64>, markers: Vec<String>) -> Self {
        let markers = markers.into_iter().map(|m| m.to_lowercase()).collect();
        Self { codes, markers }
    }

    pub fn is_session_invalid(&self, error: &ErrorObject) -> bool {
        let (code, message) = error.normalized();
        if self.codes.contains(&code) || self.codes.contains(&error.code) {
            return true;
        }
        self.mentions_marker(&message) || self.mentions_marker(&error.message)
    }

    fn mentions_marker(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.markers.iter().any(|marker| text.contains(marker.as_str()))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
