// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection state machine.
//!
//! ```text
//! Disconnected --connect()--> Connecting --Open--> Connected
//! Connecting   --Failure/Closed--> Error
//! Connected    --Failure--> Error
//! Connected    --Closed--> Disconnected
//! Error        --connect()--> Connecting
//! ```
//!
//! The machine is the only writer of the state and of the live socket.
//! Socket events are consumed by a per-socket pump task tagged with a
//! generation number, so a replaced socket can no longer move the state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::codec;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::registry::RequestRegistry;
use crate::socket::{Connector, OpenRequest, SocketEvent, SocketHandle, CLOSE_NORMAL};

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error { reason: String, cause: Option<String> },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Error { reason, cause: Some(cause) } => write!(f, "error: {reason}: {cause}"),
            Self::Error { reason, cause: None } => write!(f, "error: {reason}"),
        }
    }
}

/// Callers waiting on the socket open of one generation.
struct PendingOpen {
    generation: u64,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

pub struct Connection {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    registry: Arc<RequestRegistry>,
    state: watch::Sender<ConnectionState>,
    socket: Mutex<Option<SocketHandle>>,
    generation: AtomicU64,
    /// In-flight open. Guards starting a new one so concurrent callers share it.
    pending_open: Mutex<Option<PendingOpen>>,
}

impl Connection {
    pub fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        registry: Arc<RequestRegistry>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            connector,
            registry,
            state,
            socket: Mutex::new(None),
            generation: AtomicU64::new(0),
            pending_open: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Open a socket and wait until it reports open or failure.
    ///
    /// Returns immediately when already connected and joins an open already
    /// in flight. A failed attempt leaves the state at `Error` until the
    /// next `connect()`.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        match self.join_or_open().await {
            Ok(result) => result,
            Err(_) => Err(ClientError::transport("connect abandoned")),
        }
    }

    /// Make sure a socket exists to queue frames on, starting an open
    /// without waiting for it when there is none.
    pub fn ensure_socket(self: &Arc<Self>) {
        if self.socket.lock().is_none() {
            drop(self.join_or_open());
        }
    }

    /// Subscribe to the open in flight, or start one. Resolves at once when
    /// already connected.
    fn join_or_open(self: &Arc<Self>) -> oneshot::Receiver<Result<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut pending = self.pending_open.lock();
        if let Some(open) = pending.as_mut() {
            open.waiters.push(done_tx);
            return done_rx;
        }
        if self.is_connected() {
            let _ = done_tx.send(Ok(()));
            return done_rx;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *pending = Some(PendingOpen { generation, waiters: vec![done_tx] });
        self.state.send_replace(ConnectionState::Connecting);

        let url = self.config.websocket_url();
        info!(url = %url, "connecting");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let request = OpenRequest {
            url,
            trust: self.config.trust_policy(),
            timeout: self.config.connection_timeout(),
        };
        let handle = self.connector.open(request, events_tx);
        if let Some(previous) = self.socket.lock().replace(handle) {
            previous.close(CLOSE_NORMAL, "replaced");
        }
        tokio::spawn(pump(Arc::downgrade(self), generation, events_rx));
        done_rx
    }

    /// Close the socket and drop pending calls without failing them.
    pub fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(socket) = self.socket.lock().take() {
            socket.close(CLOSE_NORMAL, "client disconnect");
        }
        if let Some(open) = self.pending_open.lock().take() {
            let error = ClientError::transport("disconnected while connecting");
            for waiter in open.waiters {
                let _ = waiter.send(Err(error.clone()));
            }
        }
        let dropped = self.registry.clear();
        diag!(self.config.enable_debug_logging, dropped, "disconnected");
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Send a frame on the live socket.
    pub fn send(&self, frame: String) -> Result<()> {
        match self.socket.lock().as_ref() {
            Some(socket) => socket.send(frame),
            None => Err(ClientError::transport("not connected")),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn finish_connect(&self, generation: u64, result: Result<()>) {
        let mut pending = self.pending_open.lock();
        if pending.as_ref().is_some_and(|open| open.generation == generation) {
            if let Some(open) = pending.take() {
                for waiter in open.waiters {
                    let _ = waiter.send(result.clone());
                }
            }
        }
    }

    fn handle_event(&self, generation: u64, event: SocketEvent) {
        match event {
            SocketEvent::Open => self.on_open(generation),
            SocketEvent::Message(text) => self.on_message(&text),
            SocketEvent::Failure(cause) => self.on_failure(generation, cause),
            SocketEvent::Closed { code, reason } => self.on_closed(generation, code, reason),
        }
    }

    fn on_open(&self, generation: u64) {
        if self.state() != ConnectionState::Connecting {
            return;
        }
        info!("connected");
        self.state.send_replace(ConnectionState::Connected);
        self.finish_connect(generation, Ok(()));
    }

    fn on_message(&self, text: &str) {
        let debug = self.config.enable_debug_logging;
        let Some(envelope) = codec::decode(text) else {
            match codec::frame_id(text) {
                Some(id) if self.registry.resolve(id, Err(malformed(text))) => {
                    warn!(id, "malformed response");
                }
                _ => diag!(debug, frame = %text, "dropping malformed frame"),
            }
            return;
        };
        if envelope.is_notification() {
            diag!(debug, method = ?envelope.method, "notification");
            return;
        }
        match envelope.id {
            Some(id) => {
                if !self.registry.resolve(id, Ok(envelope)) {
                    diag!(debug, id, "response for unknown id dropped");
                }
            }
            None => diag!(debug, frame = %text, "response without id dropped"),
        }
    }

    fn on_failure(&self, generation: u64, cause: String) {
        let reason = match self.state() {
            ConnectionState::Connecting => "connection failed",
            ConnectionState::Connected => "connection lost",
            _ => return,
        };
        warn!(err = %cause, "{reason}");
        self.fail(generation, reason, cause);
    }

    fn on_closed(&self, generation: u64, code: u16, reason: String) {
        match self.state() {
            ConnectionState::Connected => {
                info!(code, reason = %reason, "connection closed");
                self.socket.lock().take();
                let failed =
                    self.registry.fail_all(ClientError::transport(format!("connection closed ({code})")));
                diag!(self.config.enable_debug_logging, failed, "failed pending calls on close");
                self.state.send_replace(ConnectionState::Disconnected);
            }
            ConnectionState::Connecting => {
                warn!(code, reason = %reason, "closed during handshake");
                self.fail(generation, "connection failed", format!("closed ({code}) {reason}"));
            }
            _ => {}
        }
    }

    fn fail(&self, generation: u64, reason: &str, cause: String) {
        self.socket.lock().take();
        let error = ClientError::transport(format!("{reason}: {cause}"));
        let failed = self.registry.fail_all(error.clone());
        diag!(self.config.enable_debug_logging, failed, "failed pending calls");
        self.state.send_replace(ConnectionState::Error {
            reason: reason.to_owned(),
            cause: Some(cause),
        });
        self.finish_connect(generation, Err(error));
    }
}

fn malformed(text: &str) -> ClientError {
    ClientError::Deserialization(format!("malformed response: {text}"))
}

/// Feed one socket's events into the state machine until the socket ends,
/// is replaced, or the connection is dropped.
async fn pump(
    connection: Weak<Connection>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(conn) = connection.upgrade() else { return };
        if !conn.is_current(generation) {
            return;
        }
        conn.handle_event(generation, event);
    }

    // The connector dropped its sender without a terminal event.
    if let Some(conn) = connection.upgrade() {
        if conn.is_current(generation) {
            conn.handle_event(generation, SocketEvent::Failure("socket task ended".to_owned()));
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
