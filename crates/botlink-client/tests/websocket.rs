//! WebSocket transport against a local bot server.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use botlink_client::{BotClient, ClientOptions, NoopCallbacks, WebSocketTransport};
use botlink_core::types::DataMessage;
use botlink_core::{SessionError, TransportState};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Accept one connection: answer `client-ready` with `bot-ready`, echo
/// client messages as server responses, and close on `disconnect-bot`.
async fn spawn_bot() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _ = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            let msg: Value = serde_json::from_str(text.as_str()).unwrap();
            let reply = match msg["type"].as_str() {
                Some("client-ready") => json!({
                    "label": "rtvi-ai",
                    "type": "bot-ready",
                    "data": {"version": "1.0.0"},
                }),
                Some("client-message") => json!({
                    "id": msg["id"],
                    "label": "rtvi-ai",
                    "type": "server-response",
                    "data": {"t": "echo", "d": msg["data"]["d"]},
                }),
                Some("disconnect-bot") => {
                    let _ = ws.close(None).await;
                    break;
                }
                _ => continue,
            };
            ws.send(Message::Text(reply.to_string().into())).await.unwrap();
        }
    });
    format!("ws://{addr}")
}

fn client(configure: impl FnOnce(ClientOptions) -> ClientOptions) -> BotClient {
    let options = configure(ClientOptions::new(Arc::new(NoopCallbacks)));
    BotClient::new(Arc::new(WebSocketTransport::new()), options).unwrap()
}

#[tokio::test]
async fn connect_request_and_bot_disconnect() {
    let url = spawn_bot().await;
    let client = client(|o| o);
    let mut state = client.subscribe_state();

    timeout(TIMEOUT, client.connect(json!({"url": url})).wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.state(), TransportState::Ready);

    let response = timeout(TIMEOUT, client.send_client_request("hello", json!({"x": 1})).wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        response,
        DataMessage {
            msg_type: "echo".into(),
            data: json!({"x": 1}),
        }
    );

    client.disconnect_bot().wait().await.unwrap();
    timeout(TIMEOUT, state.wait_for(|s| *s == TransportState::Disconnected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn falls_back_to_configured_url() {
    let url = spawn_bot().await;
    let client = client(|mut o| {
        o.transport_url = Some(url);
        o
    });

    timeout(TIMEOUT, client.connect(json!({})).wait())
        .await
        .unwrap()
        .unwrap();
    client.disconnect().wait().await.unwrap();
}

#[tokio::test]
async fn missing_url_fails_and_frees_the_connection() {
    let client = client(|o| o);
    assert_eq!(
        client.connect(json!({})).wait().await,
        Err(SessionError::transport("no websocket url"))
    );

    let url = spawn_bot().await;
    timeout(TIMEOUT, client.connect(json!({"url": url})).wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client(|o| o);
    let result = timeout(TIMEOUT, client.connect(json!({"url": format!("ws://{addr}")})).wait())
        .await
        .unwrap();
    assert_matches!(result, Err(SessionError::Transport(_)));

    let mut state = client.subscribe_state();
    timeout(TIMEOUT, state.wait_for(|s| *s == TransportState::Disconnected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn send_without_connection_fails() {
    let client = client(|o| o);
    assert_matches!(
        client.send_client_message("x", json!({})).wait().await,
        Err(SessionError::Transport(_))
    );
}

#[tokio::test]
async fn disconnect_during_handshake_cancels_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _ = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        if let Ok(mut ws) = accept_async(stream).await {
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let client = client(|o| o);
    let mut state = client.subscribe_state();
    let connecting = client.connect(json!({"url": format!("ws://{addr}")}));
    timeout(TIMEOUT, state.wait_for(|s| *s == TransportState::Connecting))
        .await
        .unwrap()
        .unwrap();

    client.disconnect().wait().await.unwrap();
    assert_eq!(
        timeout(TIMEOUT, connecting.wait()).await.unwrap(),
        Err(SessionError::OperationCancelled)
    );
    timeout(TIMEOUT, state.wait_for(|s| *s == TransportState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    // The delayed handshake would have completed by now.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(client.state(), TransportState::Disconnected);

    let url = spawn_bot().await;
    timeout(TIMEOUT, client.connect(json!({"url": url})).wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.state(), TransportState::Ready);
}
