//! End-to-end integration tests using a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::request::Parts;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use wsgate_core::{BoxError, Envelope, EnvelopePersister, Identity, SessionInfo};
use wsgate_server::{ConnectionHandle, Frame, Gateway, MessageHandler, ServerConfig, SessionValidator};
use wsgate_store::MemoryEnvelopeStore;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Admits `?client=<identity>`; anything else is rejected.
struct QueryValidator;

#[async_trait]
impl SessionValidator for QueryValidator {
    async fn validate(&self, request: &Parts) -> Result<SessionInfo, BoxError> {
        let raw = request
            .uri
            .query()
            .and_then(|q| q.strip_prefix("client="))
            .ok_or("missing client parameter")?;
        Ok(SessionInfo::new(Identity::parse(raw)?))
    }
}

/// Saves each `{type, payload}` frame as an envelope and echoes it back
/// tracked, so the write confirms delivery.
struct EnvelopeEcho {
    store: Arc<MemoryEnvelopeStore>,
}

#[async_trait]
impl MessageHandler for EnvelopeEcho {
    async fn handle(&self, connection: &ConnectionHandle, frame: Frame) -> Result<(), BoxError> {
        let Frame::Text(text) = frame else {
            return Err("binary frames are not supported".into());
        };
        let value: Value = serde_json::from_str(&text)?;
        let kind = value["type"].as_str().ok_or("missing type")?;
        let payload: Map<String, Value> = value
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let envelope = Envelope::new(connection.id, kind, payload);
        self.store.save_envelope(&envelope).await?;
        connection.try_enqueue_tracked(serde_json::to_string(&envelope)?, envelope.id)?;
        Ok(())
    }
}

struct TestServer {
    addr: SocketAddr,
    gateway: Arc<Gateway>,
    store: Arc<MemoryEnvelopeStore>,
}

impl TestServer {
    fn url(&self, client: Option<Identity>) -> String {
        match client {
            Some(id) => format!("ws://{}/ws?client={id}", self.addr),
            None => format!("ws://{}/ws", self.addr),
        }
    }
}

/// Boot a gateway on an ephemeral port.
async fn boot_server() -> TestServer {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let gateway = Arc::new(Gateway::new(
        ServerConfig::default(), // port 0 = auto-assign
        Arc::new(QueryValidator),
        Arc::new(EnvelopeEcho {
            store: Arc::clone(&store),
        }),
        store.clone(),
    ));
    let (addr, _handle) = gateway.listen().await.unwrap();
    TestServer {
        addr,
        gateway,
        store,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("timeout connecting")
        .expect("connect failed");
    ws
}

/// Status code of a refused handshake.
async fn refused_status(url: &str) -> u16 {
    match timeout(TIMEOUT, connect_async(url)).await.expect("timeout connecting") {
        Ok(_) => panic!("handshake unexpectedly succeeded"),
        Err(tungstenite::Error::Http(resp)) => resp.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn e2e_chat_echo_confirms_delivery() {
    let server = boot_server().await;
    let client = Identity::new();
    let mut ws = connect(&server.url(Some(client))).await;

    let request = json!({"type": "chat", "payload": {"text": "hello"}});
    ws.send(Message::text(request.to_string())).await.unwrap();

    let echoed = read_json(&mut ws).await;
    assert_eq!(echoed["client_id"], client.to_string());
    assert_eq!(echoed["type"], "chat");
    assert_eq!(echoed["payload"]["text"], "hello");

    let envelope_id = Identity::parse(echoed["id"].as_str().unwrap()).unwrap();
    let store = Arc::clone(&server.store);
    eventually(|| store.get(envelope_id).is_some_and(|e| e.is_delivered())).await;
    assert_eq!(store.list_for_client(client).len(), 1);

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn handle_carries_validator_identity() {
    let server = boot_server().await;
    let client = Identity::new();
    let _ws = connect(&server.url(Some(client))).await;

    assert_eq!(server.gateway.registry().len(), 1);
    let handle = server.gateway.registry().get(client).unwrap();
    assert_eq!(handle.id, client);

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn rejected_session_gets_401() {
    let server = boot_server().await;

    assert_eq!(refused_status(&server.url(None)).await, 401);
    assert!(server.gateway.registry().is_empty());

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn duplicate_identity_gets_409() {
    let server = boot_server().await;
    let client = Identity::new();
    let _first = connect(&server.url(Some(client))).await;

    assert_eq!(refused_status(&server.url(Some(client))).await, 409);
    assert_eq!(server.gateway.registry().len(), 1);

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let server = boot_server().await;
    let mut ws = connect(&server.url(Some(Identity::new()))).await;

    ws.send(Message::text("not json")).await.unwrap();
    ws.send(Message::text(json!({"type": "chat"}).to_string()))
        .await
        .unwrap();

    let echoed = read_json(&mut ws).await;
    assert_eq!(echoed["type"], "chat");

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn ping_is_not_dispatched() {
    let server = boot_server().await;
    let mut ws = connect(&server.url(Some(Identity::new()))).await;

    ws.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
    ws.send(Message::text(json!({"type": "chat"}).to_string()))
        .await
        .unwrap();

    // The first text message back is the chat echo, and only one envelope exists.
    let echoed = read_json(&mut ws).await;
    assert_eq!(echoed["type"], "chat");
    assert_eq!(server.store.len(), 1);

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn abrupt_disconnect_unregisters() {
    let server = boot_server().await;
    let client = Identity::new();
    let ws = connect(&server.url(Some(client))).await;
    assert!(server.gateway.registry().contains(client));

    drop(ws);

    let gateway = Arc::clone(&server.gateway);
    eventually(|| gateway.registry().is_empty()).await;

    // The identity is free again.
    let _again = connect(&server.url(Some(client))).await;
    assert!(server.gateway.registry().contains(client));

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn administrative_disconnect_closes_client() {
    let server = boot_server().await;
    let client = Identity::new();
    let mut ws = connect(&server.url(Some(client))).await;

    assert!(server.gateway.registry().disconnect(client));

    let next = timeout(TIMEOUT, ws.next()).await.expect("timeout waiting for close");
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    let gateway = Arc::clone(&server.gateway);
    eventually(|| gateway.registry().is_empty()).await;

    server.gateway.shutdown().shutdown();
}

#[tokio::test]
async fn graceful_shutdown_drains_connections() {
    let server = boot_server().await;
    let _a = connect(&server.url(Some(Identity::new()))).await;
    let _b = connect(&server.url(Some(Identity::new()))).await;
    assert_eq!(server.gateway.registry().len(), 2);

    assert!(server.gateway.graceful_shutdown().await);
    assert!(server.gateway.registry().is_empty());
}

#[tokio::test]
async fn health_reports_connections() {
    let server = boot_server().await;
    let _ws = connect(&server.url(Some(Identity::new()))).await;
    let gateway = Arc::clone(&server.gateway);
    eventually(|| gateway.registry().active_len() == 1).await;

    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    let request = format!(
        "GET /health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut raw = String::new();
    let _ = timeout(
        TIMEOUT,
        tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut raw),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(raw.starts_with("HTTP/1.1 200"));
    let body = raw.split("\r\n\r\n").nth(1).unwrap();
    let parsed: Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["connections"], 1);
    assert_eq!(parsed["upgrading"], 0);
    assert_eq!(parsed["outbound_dropped"], 0);

    server.gateway.shutdown().shutdown();
}
