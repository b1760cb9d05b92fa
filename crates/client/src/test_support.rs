// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted in-memory connector and helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::TrueNasClient;
use crate::codec::RequestEnvelope;
use crate::config::ClientConfig;
use crate::credential::MemoryCredentialStore;
use crate::socket::{Connector, OpenRequest, Outbound, SocketEvent, SocketHandle, SocketOutbox};

const WAIT: Duration = Duration::from_secs(5);

/// How the next `open()` behaves.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    /// Report `Open` immediately.
    Accept,
    /// Report `Failure` immediately.
    Refuse(String),
    /// Report nothing; the test drives the handshake through [`MockServer`].
    Hold,
}

/// In-memory [`Connector`]. Every open hands a [`MockServer`] to the test.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<MockInner>,
}

struct MockInner {
    opens: AtomicUsize,
    script: Mutex<VecDeque<OpenBehavior>>,
    servers_tx: mpsc::UnboundedSender<MockServer>,
    servers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockServer>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockInner {
                opens: AtomicUsize::new(0),
                script: Mutex::new(VecDeque::new()),
                servers_tx,
                servers_rx: tokio::sync::Mutex::new(servers_rx),
            }),
        }
    }

    /// Queue the behavior of a future open. Unscripted opens accept.
    pub fn script(&self, behavior: OpenBehavior) -> &Self {
        self.inner.script.lock().push_back(behavior);
        self
    }

    /// Number of sockets opened so far.
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::Acquire)
    }

    /// Wait for the server side of the next opened socket.
    pub async fn next_server(&self) -> anyhow::Result<MockServer> {
        let mut rx = self.inner.servers_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("no socket opened"))?
            .ok_or_else(|| anyhow::anyhow!("connector dropped"))
    }
}

impl Connector for MockConnector {
    fn open(
        &self,
        request: OpenRequest,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> SocketHandle {
        self.inner.opens.fetch_add(1, Ordering::AcqRel);
        let behavior = self.inner.script.lock().pop_front().unwrap_or(OpenBehavior::Accept);
        match behavior {
            OpenBehavior::Accept => {
                let _ = events.send(SocketEvent::Open);
            }
            OpenBehavior::Refuse(reason) => {
                let _ = events.send(SocketEvent::Failure(reason));
            }
            OpenBehavior::Hold => {}
        }
        let (handle, outbox) = SocketHandle::pair();
        let _ = self.inner.servers_tx.send(MockServer { request, events, outbox });
        handle
    }
}

/// Server side of one mock socket.
pub struct MockServer {
    pub request: OpenRequest,
    events: mpsc::UnboundedSender<SocketEvent>,
    outbox: SocketOutbox,
}

impl MockServer {
    pub fn accept(&self) {
        let _ = self.events.send(SocketEvent::Open);
    }

    pub fn fail(&self, cause: &str) {
        let _ = self.events.send(SocketEvent::Failure(cause.to_owned()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(SocketEvent::Closed { code, reason: reason.to_owned() });
    }

    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Message(text.into()));
    }

    pub fn reply(&self, id: u32, result: Value) {
        self.push_raw(serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string());
    }

    pub fn reply_error(&self, id: u32, code: i64, message: &str, data: Option<Value>) {
        let mut error = serde_json::json!({"code": code, "message": message});
        if let Some(data) = data {
            error["data"] = data;
        }
        self.push_raw(serde_json::json!({"jsonrpc": "2.0", "id": id, "error": error}).to_string());
    }

    pub fn notify(&self, method: &str, params: Value) {
        self.push_raw(
            serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string(),
        );
    }

    /// Wait for the next request frame the client sent.
    pub async fn next_request(&mut self) -> anyhow::Result<RequestEnvelope> {
        let frame = tokio::time::timeout(WAIT, self.outbox.recv())
            .await
            .map_err(|_| anyhow::anyhow!("no request sent"))?
            .ok_or_else(|| anyhow::anyhow!("socket handle dropped"))?;
        match frame {
            Outbound::Text(text) => Ok(serde_json::from_str(&text)?),
            other => anyhow::bail!("expected request frame, got {other:?}"),
        }
    }

    /// Next queued frame, without waiting.
    pub fn try_next_frame(&mut self) -> Option<Outbound> {
        self.outbox.try_recv()
    }
}

/// Client wired to a fresh [`MockConnector`] and in-memory credentials.
pub fn mock_client(config: ClientConfig) -> anyhow::Result<(TrueNasClient, MockConnector)> {
    let connector = MockConnector::new();
    let client = TrueNasClient::builder(config)
        .connector(connector.clone())
        .credentials(Arc::new(MemoryCredentialStore::new()))
        .build()?;
    Ok((client, connector))
}

/// Default test configuration.
pub fn test_config() -> ClientConfig {
    ClientConfig::new("ws://nas.test").with_debug_logging(true)
}

/// Poll `check` until it holds or a short deadline passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    check()
}

#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
