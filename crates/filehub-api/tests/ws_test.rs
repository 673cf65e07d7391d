//! End-to-end WebSocket tests against a served router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use filehub_api::{AppState, build_router};
use filehub_core::config::{AppConfig, RealtimeConfig};
use filehub_core::types::{FolderId, UserId};
use filehub_realtime::{Event, Hub};
use filehub_worker::MemoryJobQueue;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(hub: Hub) -> SocketAddr {
    let state = AppState::new(
        Arc::new(AppConfig::default()),
        hub,
        Arc::new(MemoryJobQueue::new()),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.expect("serve");
    });
    addr
}

async fn connect(addr: SocketAddr, user_id: UserId) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws?user_id={user_id}"))
        .await
        .expect("connect");
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("json");
        }
    }
}

async fn wait_for_connections(hub: &Hub, expected: usize) {
    for _ in 0..100 {
        if hub.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {expected} connections");
}

#[tokio::test]
async fn test_connect_subscribe_and_receive_folder_event() {
    let hub = Hub::new(RealtimeConfig::default());
    let addr = serve(hub.clone()).await;
    let user = UserId::new();
    let folder = FolderId::new();

    let mut client = connect(addr, user).await;
    let connected = next_json(&mut client).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["data"]["user_id"], json!(user));

    client
        .send(Message::text(
            json!({"action": "subscribe", "folder_id": folder}).to_string(),
        ))
        .await
        .expect("send");
    let ack = next_json(&mut client).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["data"]["action"], "subscribe");

    let delivery = hub
        .broadcast(&Event::new("file_created", json!({"name": "a.txt"})), Some(folder))
        .await;
    assert_eq!(delivery.delivered, 1);

    let event = next_json(&mut client).await;
    assert_eq!(event["type"], "file_created");
    assert_eq!(event["payload"]["name"], "a.txt");
}

#[tokio::test]
async fn test_ping_command_gets_pong() {
    let hub = Hub::new(RealtimeConfig::default());
    let addr = serve(hub.clone()).await;
    let mut client = connect(addr, UserId::new()).await;
    next_json(&mut client).await;

    client
        .send(Message::text(json!({"action": "ping"}).to_string()))
        .await
        .expect("send");

    let pong = next_json(&mut client).await;
    assert_eq!(pong["type"], "ack");
    assert_eq!(pong["data"]["action"], "pong");
}

#[tokio::test]
async fn test_client_close_unregisters_connection() {
    let hub = Hub::new(RealtimeConfig::default());
    let addr = serve(hub.clone()).await;
    let mut client = connect(addr, UserId::new()).await;
    next_json(&mut client).await;
    wait_for_connections(&hub, 1).await;

    client.close(None).await.expect("close");

    wait_for_connections(&hub, 0).await;
}

#[tokio::test]
async fn test_hub_shutdown_closes_client() {
    let hub = Hub::new(RealtimeConfig::default());
    let addr = serve(hub.clone()).await;
    let mut client = connect(addr, UserId::new()).await;
    next_json(&mut client).await;
    wait_for_connections(&hub, 1).await;

    hub.shutdown().await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => continue,
            }
        }
        true
    })
    .await
    .expect("closed in time");
    assert!(closed);
    assert_eq!(hub.connection_count().await, 0);
}
