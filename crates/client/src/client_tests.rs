// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::*;
use crate::credential::{SessionRecord, StoredCredentials};
use crate::test_support::{eventually, mock_client, test_config, MockConnector, OpenBehavior};

fn session() -> SessionRecord {
    SessionRecord { server_id: "nas.test".into(), account_id: "root".into(), token: "tok".into() }
}

fn client_with_credentials(
    creds: StoredCredentials,
) -> anyhow::Result<(TrueNasClient, MockConnector, Arc<MemoryCredentialStore>)> {
    let connector = MockConnector::new();
    let store = Arc::new(MemoryCredentialStore::with_credentials(creds));
    let client = TrueNasClient::builder(test_config())
        .connector(connector.clone())
        .credentials(store.clone())
        .build()?;
    Ok((client, connector, store))
}

#[test]
fn builder_rejects_invalid_config() {
    crate::assert_err_contains!(
        TrueNasClient::new(ClientConfig::new("ftp://nas")).map(|_| ()),
        "unsupported"
    );
}

#[yare::parameterized(
    login = { "auth.login", true },
    login_ex = { "auth.login_ex", true },
    api_key = { "auth.login_with_api_key", true },
    token = { "auth.login_with_token", true },
    generate = { "auth.generate_token", true },
    logout = { "auth.logout", false },
    ping = { "core.ping", false },
    query = { "pool.query", false },
)]
fn login_family(method: &str, expected: bool) {
    assert_eq!(is_login_method(method), expected);
}

#[tokio::test]
async fn call_connects_and_round_trips() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<Vec<String>>("pool.query", vec![json!([]), json!({})]).await }
    });

    let mut server = connector.next_server().await?;
    let request = server.next_request().await?;
    assert_eq!(request.jsonrpc, "2.0");
    assert_eq!(request.id, 1);
    assert_eq!(request.method, "pool.query");
    assert_eq!(request.params, vec![json!([]), json!({})]);
    server.reply(request.id, json!(["tank", "boot-pool"]));

    assert_eq!(task.await??, vec!["tank".to_owned(), "boot-pool".to_owned()]);
    assert!(client.is_connected());
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_calls_correlate_out_of_order() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    client.connect().await?;
    let mut server = connector.next_server().await?;

    let tasks: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|tag| {
            let client = client.clone();
            tokio::spawn(async move { client.call::<String>("test.echo", vec![json!(tag)]).await })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..3 {
        requests.push(server.next_request().await?);
    }
    for request in requests.iter().rev() {
        server.reply(request.id, request.params[0].clone());
    }

    let mut answers = Vec::new();
    for task in tasks {
        answers.push(task.await??);
    }
    assert_eq!(answers, vec!["a", "b", "c"]);
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn ids_keep_increasing_across_reconnects() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    client.connect().await?;
    let mut first = connector.next_server().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<()>("test.noop", vec![]).await }
    });
    let request = first.next_request().await?;
    first.reply(request.id, json!(null));
    task.await??;

    client.disconnect();
    client.connect().await?;
    let mut second = connector.next_server().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<()>("test.noop", vec![]).await }
    });
    let next = second.next_request().await?;
    second.reply(next.id, json!(null));
    task.await??;

    assert!(next.id > request.id);
    Ok(())
}

#[tokio::test]
async fn connect_failure_sends_nothing() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    connector.script(OpenBehavior::Refuse("connection refused".into()));

    let err = client.call::<Value>("pool.query", vec![]).await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert!(err.is_transport());
    assert!(err.to_string().contains("cannot connect"), "{err}");

    let mut server = connector.next_server().await?;
    assert_eq!(server.try_next_frame(), None);
    assert_eq!(connector.opens(), 1);
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn login_from_disconnected_opens_without_waiting() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    connector.script(OpenBehavior::Hold);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let login = tokio::spawn({
        let client = client.clone();
        async move { client.call::<bool>("auth.login", vec![json!("root"), json!("pw")]).await }
    });
    let mut server = connector.next_server().await?;
    let request = server.next_request().await?;
    assert_eq!(request.method, "auth.login");
    assert_eq!(request.params, vec![json!("root"), json!("pw")]);

    // Answered before the handshake completes.
    server.reply(request.id, json!(true));
    assert!(login.await??);
    assert_eq!(client.state(), ConnectionState::Connecting);

    // A later connect() joins the same socket.
    let connect = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    server.accept();
    connect.await??;
    assert!(client.is_connected());
    assert_eq!(connector.opens(), 1);
    Ok(())
}

#[tokio::test]
async fn login_goes_out_while_connecting() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    connector.script(OpenBehavior::Hold);
    let connect = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    let mut server = connector.next_server().await?;
    assert!(eventually(|| client.state() == ConnectionState::Connecting).await);

    let login = tokio::spawn({
        let client = client.clone();
        async move { client.call::<bool>("auth.login", vec![json!("root"), json!("pw")]).await }
    });
    let request = server.next_request().await?;
    assert_eq!(request.method, "auth.login");
    assert_eq!(connector.opens(), 1);

    server.accept();
    server.reply(request.id, json!(true));
    connect.await??;
    assert!(login.await??);
    Ok(())
}

#[tokio::test]
async fn disabled_ping_never_touches_the_socket() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config().with_ping(false))?;

    let pong: String = client.call("core.ping", vec![]).await?;
    assert_eq!(pong, "pong");
    let alive: bool = client.call("core.ping", vec![]).await?;
    assert!(alive);
    assert!(client.ping().await?);
    assert_eq!(connector.opens(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn enabled_ping_asks_the_server() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.ping().await }
    });
    let mut server = connector.next_server().await?;
    let request = server.next_request().await?;
    assert_eq!(request.method, "core.ping");
    server.reply(request.id, json!("pong"));
    assert!(task.await??);
    Ok(())
}

#[derive(Debug, Deserialize, PartialEq)]
struct SystemInfo {
    hostname: String,
}

#[tokio::test]
async fn null_results() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    client.connect().await?;
    let mut server = connector.next_server().await?;

    let unit = tokio::spawn({
        let client = client.clone();
        async move { client.call::<()>("test.noop", vec![]).await }
    });
    let request = server.next_request().await?;
    server.push_raw(json!({"jsonrpc": "2.0", "id": request.id}).to_string());
    unit.await??;

    let optional = tokio::spawn({
        let client = client.clone();
        async move { client.call::<Option<SystemInfo>>("system.info", vec![]).await }
    });
    let request = server.next_request().await?;
    server.reply(request.id, json!(null));
    assert_eq!(optional.await??, None);

    let required = tokio::spawn({
        let client = client.clone();
        async move { client.call::<SystemInfo>("system.info", vec![]).await }
    });
    let request = server.next_request().await?;
    server.reply(request.id, json!(null));
    let err = required.await?.err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert!(matches!(err, ClientError::Deserialization(ref m) if m == "null result"), "{err}");
    Ok(())
}

#[tokio::test]
async fn shape_mismatch_is_a_deserialization_error() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<SystemInfo>("system.info", vec![]).await }
    });
    let mut server = connector.next_server().await?;
    let request = server.next_request().await?;
    server.reply(request.id, json!({"host": 1}));
    assert!(matches!(task.await?, Err(ClientError::Deserialization(_))));
    Ok(())
}

#[tokio::test]
async fn nested_error_is_unwrapped() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<Value>("pool.create", vec![]).await }
    });
    let mut server = connector.next_server().await?;
    let request = server.next_request().await?;
    server.reply_error(
        request.id,
        -32001,
        "Method call error",
        Some(json!({"error": 22, "reason": "[EINVAL] name: required"})),
    );

    match task.await? {
        Err(ClientError::Rpc { code, message, data }) => {
            assert_eq!(code, 22);
            assert_eq!(message, "[EINVAL] name: required");
            assert!(data.is_some());
        }
        other => anyhow::bail!("expected rpc error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn invalid_session_expires_credentials() -> anyhow::Result<()> {
    let (client, connector, store) = client_with_credentials(StoredCredentials {
        auth_token: Some("tok".into()),
        api_key: Some("1-key".into()),
        session: Some(session()),
    })?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<Value>("pool.query", vec![]).await }
    });
    let mut server = connector.next_server().await?;
    let request = server.next_request().await?;
    server.reply_error(
        request.id,
        -32001,
        "Method call error",
        Some(json!({"error": 207, "reason": "Invalid session"})),
    );

    let err = task.await?.err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert!(err.is_session_expired(), "{err}");
    assert_eq!(err.rpc_code(), Some(207));
    assert_eq!(store.auth_token(), None);
    assert_eq!(store.session(), None);
    assert_eq!(store.api_key(), None);
    Ok(())
}

#[tokio::test]
async fn login_errors_never_expire_the_session() -> anyhow::Result<()> {
    let (client, connector, store) = client_with_credentials(StoredCredentials {
        auth_token: Some("tok".into()),
        api_key: None,
        session: Some(session()),
    })?;
    client.connect().await?;
    let mut server = connector.next_server().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<bool>("auth.login_with_token", vec![json!("tok")]).await }
    });
    let request = server.next_request().await?;
    server.reply_error(request.id, 207, "Invalid session", None);

    let err = task.await?.err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert!(matches!(err, ClientError::Rpc { code: 207, .. }), "{err}");
    assert_eq!(store.auth_token().as_deref(), Some("tok"));
    assert_eq!(store.session(), Some(session()));
    Ok(())
}

#[tokio::test]
async fn transport_failure_keeps_credentials() -> anyhow::Result<()> {
    let (client, connector, store) = client_with_credentials(StoredCredentials {
        auth_token: Some("tok".into()),
        ..Default::default()
    })?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<Value>("pool.query", vec![]).await }
    });
    let mut server = connector.next_server().await?;
    server.next_request().await?;
    server.fail("connection reset");

    let err = task.await?.err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert!(err.is_transport());
    assert_eq!(store.auth_token().as_deref(), Some("tok"));
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_call_frees_its_slot() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    client.connect().await?;
    let mut server = connector.next_server().await?;

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<Value>("test.slow", vec![]).await }
    });
    server.next_request().await?;
    assert_eq!(client.pending_calls(), 1);

    task.abort();
    let _ = task.await;
    assert!(eventually(|| client.pending_calls() == 0).await);
    Ok(())
}

#[tokio::test]
async fn timeout_wrapped_call_frees_its_slot() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    client.connect().await?;
    let _server = connector.next_server().await?;

    let result =
        tokio::time::timeout(Duration::from_millis(20), client.call::<Value>("test.slow", vec![]))
            .await;
    assert!(result.is_err());
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn disconnect_abandons_pending_calls() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    client.connect().await?;
    let mut server = connector.next_server().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call::<Value>("test.slow", vec![]).await }
    });
    server.next_request().await?;

    client.disconnect();
    assert!(matches!(task.await?, Err(ClientError::Disconnected)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn call_with_result_reports_values_and_loading() -> anyhow::Result<()> {
    let (client, connector) = mock_client(test_config())?;
    assert!(!client.is_loading());
    assert!(CallResult::<u32>::default().is_loading());

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call_with_result::<u32>("test.count", vec![]).await }
    });
    let mut server = connector.next_server().await?;
    let request = server.next_request().await?;
    assert!(client.is_loading());
    server.reply(request.id, json!(7));

    let outcome = task.await?;
    assert!(outcome.is_success());
    assert_eq!(outcome.value(), Some(&7));
    assert!(!client.is_loading());

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.call_with_result::<u32>("test.count", vec![]).await }
    });
    let request = server.next_request().await?;
    server.reply_error(request.id, -32601, "Method not found", None);
    match task.await? {
        CallResult::Error { message, cause } => {
            assert!(message.contains("Method not found"), "{message}");
            assert!(matches!(cause, Some(ClientError::Rpc { code: -32601, .. })));
        }
        other => anyhow::bail!("expected error outcome, got {other:?}"),
    }
    assert!(!client.is_loading());
    Ok(())
}
