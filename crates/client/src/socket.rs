// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport socket: one duplex text channel to the server.
//!
//! A [`Connector`] opens the socket and reports lifecycle through an event
//! channel; the returned [`SocketHandle`] is the write side. The connection
//! state machine consumes the events and never sees the socket internals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ClientError, Result};
use crate::tls;

/// Close code for a normal, caller-initiated shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Whether server certificates are validated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    #[default]
    Verify,
    /// Accept any certificate chain and hostname. Explicit user opt-in only.
    Insecure,
}

/// Lifecycle and data events reported by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Failure(String),
    Closed { code: u16, reason: String },
}

/// Parameters for opening a socket.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub url: String,
    pub trust: TrustPolicy,
    pub timeout: Duration,
}

/// Opens sockets. Implemented by [`WebSocketConnector`] and by test doubles.
pub trait Connector: Send + Sync + 'static {
    /// Begin the handshake. Exactly one of `Open` or `Failure` is reported
    /// first on `events`; the handle may be written to before that.
    fn open(&self, request: OpenRequest, events: mpsc::UnboundedSender<SocketEvent>)
        -> SocketHandle;
}

/// Frames queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Write side of an open (or opening) socket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

/// Writer-task side of a [`SocketHandle`].
pub struct SocketOutbox {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl SocketHandle {
    pub fn pair() -> (Self, SocketOutbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, closed: Arc::new(AtomicBool::new(false)) }, SocketOutbox { rx })
    }

    /// Queue a text frame. Fails when the socket is closed or its writer is gone.
    pub fn send(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::transport("not connected"));
        }
        self.tx.send(Outbound::Text(text)).map_err(|_| ClientError::transport("not connected"))
    }

    /// Begin a graceful close. Only the first call has any effect.
    pub fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Outbound::Close { code, reason: reason.to_owned() });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

impl SocketOutbox {
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector over tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(
        &self,
        request: OpenRequest,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> SocketHandle {
        let (handle, outbox) = SocketHandle::pair();
        tokio::spawn(run_socket(request, events, outbox));
        handle
    }
}

async fn connect(request: &OpenRequest) -> std::result::Result<WsStream, String> {
    tls::install_crypto_provider();
    let connector = match request.trust {
        TrustPolicy::Verify => None,
        TrustPolicy::Insecure => Some(tokio_tungstenite::Connector::Rustls(Arc::new(
            tls::insecure_client_config().map_err(|e| format!("tls setup: {e}"))?,
        ))),
    };

    let handshake =
        tokio_tungstenite::connect_async_tls_with_config(request.url.as_str(), None, false, connector);
    match tokio::time::timeout(request.timeout, handshake).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("connect timed out after {}ms", request.timeout.as_millis())),
    }
}

/// Socket task: handshake, then pump frames both ways until either side ends.
async fn run_socket(
    request: OpenRequest,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut outbox: SocketOutbox,
) {
    let stream = match connect(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(SocketEvent::Failure(e));
            return;
        }
    };
    let _ = events.send(SocketEvent::Open);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            out = outbox.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let _ = events.send(SocketEvent::Failure(format!("send failed: {e}")));
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.clone().into() };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.close().await;
                    let _ = events.send(SocketEvent::Closed { code, reason });
                    return;
                }
                // Every handle is gone; nobody can observe this socket any more.
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((1005, String::new()));
                    let _ = events.send(SocketEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {} // ping/pong handled by tungstenite, binary unused
                Some(Err(e)) => {
                    let _ = events.send(SocketEvent::Failure(e.to_string()));
                    return;
                }
                None => {
                    let _ = events.send(SocketEvent::Failure("connection reset".to_owned()));
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
