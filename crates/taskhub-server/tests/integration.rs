//! End-to-end tests against a real listener with `WebSocket` and HTTP clients.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::TimeDelta;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use taskhub_auth::{TokenVerifier, issue_token};
use taskhub_server::config::ServerConfig;
use taskhub_server::server::TaskHubServer;

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "integration-secret";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot_server() -> (TaskHubServer, SocketAddr) {
    let server = TaskHubServer::new(ServerConfig::default(), TokenVerifier::new(SECRET));
    let addr = server.listen().await.unwrap();
    (server, addr)
}

fn token(sub: &str) -> String {
    issue_token(SECRET, sub, None, TimeDelta::hours(1)).unwrap()
}

async fn connect(addr: SocketAddr, sub: &str) -> WsStream {
    let url = format!("ws://{addr}/ws?token={}", token(sub));
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Next text frame, skipping transport keepalives.
async fn next_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn wait_for_clients(server: &TaskHubServer, expected: usize) {
    let waited = timeout(TIMEOUT, async {
        while server.hub().client_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "expected {expected} clients");
}

async fn post_broadcast(addr: SocketAddr, body: &Value) -> (reqwest::StatusCode, Value) {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/broadcast"))
        .bearer_auth(token("producer"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn broadcast_reaches_connected_clients() {
    let (server, addr) = boot_server().await;
    let mut a = connect(addr, "alice").await;
    let mut b = connect(addr, "bob").await;
    wait_for_clients(&server, 2).await;

    let (status, body) =
        post_broadcast(addr, &json!({"type": "task_created", "data": {"id": "42"}})).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "message": "Message broadcasted", "clients": 2})
    );

    let expected = r#"{"type":"task_created","payload":{"id":"42"}}"#;
    assert_eq!(next_text(&mut a).await, expected);
    assert_eq!(next_text(&mut b).await, expected);

    // A leaves; only B sees the delete
    a.close(None).await.unwrap();
    wait_for_clients(&server, 1).await;

    let (status, body) =
        post_broadcast(addr, &json!({"type": "task_deleted", "data": {"id": "42"}})).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["clients"], 1);
    assert_eq!(
        next_text(&mut b).await,
        r#"{"type":"task_deleted","payload":{"id":"42"}}"#
    );

    server.shutdown().graceful_shutdown(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn envelope_ping_gets_pong() {
    let (server, addr) = boot_server().await;
    let mut ws = connect(addr, "alice").await;

    ws.send(Message::Text(r#"{"type":"ping","payload":{"n":1}}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut ws).await, r#"{"type":"pong","payload":{"n":1}}"#);

    server.shutdown().graceful_shutdown(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn missing_token_rejected_with_401() {
    let (server, addr) = boot_server().await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    assert_eq!(server.hub().client_count(), 0);

    server.shutdown().graceful_shutdown(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn health_reports_connected_clients() {
    let (server, addr) = boot_server().await;
    let _ws = connect(addr, "alice").await;
    wait_for_clients(&server, 1).await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connectedClients"], 1);

    server.shutdown().graceful_shutdown(Some(TIMEOUT)).await;
}

#[tokio::test]
async fn shutdown_closes_client_sockets() {
    let (server, addr) = boot_server().await;
    let mut ws = connect(addr, "alice").await;
    wait_for_clients(&server, 1).await;

    server.shutdown().graceful_shutdown(Some(TIMEOUT)).await;
    // Client pumps are drained, not abandoned
    assert!(server.shutdown().connections().is_empty());

    let last = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => return other,
            }
        }
    })
    .await
    .expect("timed out waiting for close");
    assert!(
        matches!(last, Some(Ok(Message::Close(_)))),
        "expected a close frame, got {last:?}"
    );
}
