// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn send_queues_text_frames() -> anyhow::Result<()> {
    let (handle, mut outbox) = SocketHandle::pair();
    handle.send("one".into())?;
    handle.send("two".into())?;

    assert_eq!(outbox.try_recv(), Some(Outbound::Text("one".into())));
    assert_eq!(outbox.try_recv(), Some(Outbound::Text("two".into())));
    assert_eq!(outbox.try_recv(), None);
    Ok(())
}

#[test]
fn close_is_idempotent() {
    let (handle, mut outbox) = SocketHandle::pair();
    handle.close(CLOSE_NORMAL, "bye");
    handle.close(CLOSE_NORMAL, "bye again");
    handle.clone().close(4000, "from a clone");

    assert_eq!(outbox.try_recv(), Some(Outbound::Close { code: CLOSE_NORMAL, reason: "bye".into() }));
    assert_eq!(outbox.try_recv(), None);
    assert!(handle.is_closed());
}

#[test]
fn send_after_close_reports_not_connected() {
    let (handle, _outbox) = SocketHandle::pair();
    handle.close(CLOSE_NORMAL, "done");

    let err = handle.send("late".into()).err();
    assert!(matches!(err, Some(ClientError::Transport(ref m)) if m == "not connected"));
}

#[test]
fn send_without_writer_reports_not_connected() {
    let (handle, outbox) = SocketHandle::pair();
    drop(outbox);

    assert!(handle.is_closed());
    assert!(matches!(handle.send("x".into()), Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn refused_connection_reports_failure() -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = OpenRequest {
        url: format!("ws://{addr}/api/current"),
        trust: TrustPolicy::Verify,
        timeout: Duration::from_secs(5),
    };
    let _handle = WebSocketConnector.open(request, tx);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
    assert!(matches!(event, Some(SocketEvent::Failure(_))), "got {event:?}");
    Ok(())
}

#[tokio::test]
async fn stalled_handshake_times_out() -> anyhow::Result<()> {
    // Accepts TCP but never answers the HTTP upgrade.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let _server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = OpenRequest {
        url: format!("ws://{addr}/api/current"),
        trust: TrustPolicy::Verify,
        timeout: Duration::from_millis(100),
    };
    let _handle = WebSocketConnector.open(request, tx);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
    match event {
        Some(SocketEvent::Failure(reason)) => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected timeout failure, got {other:?}"),
    }
    Ok(())
}

#[test]
fn insecure_tls_config_builds() -> anyhow::Result<()> {
    let _config = tls::insecure_client_config()?;
    Ok(())
}
