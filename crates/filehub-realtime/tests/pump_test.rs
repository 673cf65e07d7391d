//! Integration tests for the connection pumps over an in-memory transport.

use std::convert::Infallible;
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use filehub_core::config::RealtimeConfig;
use filehub_core::result::AppResult;
use filehub_core::types::{ConnectionId, FolderId, UserId};
use filehub_realtime::{Event, Frame, Hub, serve_connection};

/// Client side of an in-memory connection.
struct TestClient {
    outbound: UnboundedSender<Result<Frame, Infallible>>,
    inbound: UnboundedReceiver<Frame>,
    task: JoinHandle<AppResult<ConnectionId>>,
}

impl TestClient {
    fn connect(hub: &Hub, user_id: UserId) -> Self {
        let (outbound, server_stream) = mpsc::unbounded();
        let (server_sink, inbound) = mpsc::unbounded();
        let task = tokio::spawn(serve_connection(
            hub.clone(),
            user_id,
            server_stream,
            server_sink,
        ));
        Self {
            outbound,
            inbound,
            task,
        }
    }

    fn send(&self, value: Value) {
        self.outbound
            .unbounded_send(Ok(Frame::Text(value.to_string())))
            .expect("server stream open");
    }

    async fn next_frame(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), self.inbound.next())
            .await
            .expect("frame within timeout")
            .expect("sink open")
    }

    async fn next_json(&mut self) -> Value {
        match self.next_frame().await {
            Frame::Text(text) => serde_json::from_str(&text).expect("valid json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

fn hub() -> Hub {
    Hub::new(RealtimeConfig::default())
}

#[tokio::test]
async fn test_handshake_sends_connected_ack() {
    let hub = hub();
    let user = UserId::new();
    let mut client = TestClient::connect(&hub, user);

    let connected = client.next_json().await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["user_id"], json!(user));
    assert!(connected["data"]["session_id"].is_string());
    assert_eq!(hub.connection_count().await, 1);
}

#[tokio::test]
async fn test_subscribe_then_receive_event() {
    let hub = hub();
    let folder = FolderId::new();
    let mut client = TestClient::connect(&hub, UserId::new());
    client.next_json().await;

    client.send(json!({"action": "subscribe", "folder_id": folder}));
    let ack = client.next_json().await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["data"]["folder_id"], json!(folder));

    let event = Event::new("file_created", json!({"name": "a.txt"}));
    assert_eq!(hub.broadcast(&event, Some(folder)).await.delivered, 1);

    let received = client.next_json().await;
    assert_eq!(received["type"], "file_created");
    assert_eq!(received["payload"]["name"], "a.txt");
}

#[tokio::test]
async fn test_unknown_action_gets_no_reply() {
    let hub = hub();
    let mut client = TestClient::connect(&hub, UserId::new());
    client.next_json().await;

    client.send(json!({"action": "teleport"}));
    client
        .outbound
        .unbounded_send(Ok(Frame::Text("not json".to_string())))
        .expect("open");
    client.send(json!({"action": "ping"}));

    // Replies are FIFO per connection, so the pong comes next.
    let pong = client.next_json().await;
    assert_eq!(pong["type"], "ack");
    assert_eq!(pong["data"]["action"], "pong");
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let hub = hub();
    let mut client = TestClient::connect(&hub, UserId::new());
    client.next_json().await;

    client
        .outbound
        .unbounded_send(Ok(Frame::Close))
        .expect("open");

    assert_eq!(client.next_frame().await, Frame::Close);
    client.task.await.expect("join").expect("served");
    assert_eq!(hub.connection_count().await, 0);
}

#[tokio::test]
async fn test_end_of_stream_unregisters() {
    let hub = hub();
    let TestClient {
        outbound,
        inbound,
        task,
    } = TestClient::connect(&hub, UserId::new());
    drop(outbound);

    task.await.expect("join").expect("served");
    assert_eq!(hub.connection_count().await, 0);

    let frames: Vec<Frame> = inbound.collect().await;
    assert_eq!(frames.last(), Some(&Frame::Close));
}

#[tokio::test]
async fn test_eviction_writes_close_frame() {
    let hub = hub();
    let mut client = TestClient::connect(&hub, UserId::new());
    let connected = client.next_json().await;
    let conn_id: ConnectionId =
        serde_json::from_value(connected["data"]["session_id"].clone()).expect("session id");

    hub.unregister(conn_id).await;

    assert_eq!(client.next_frame().await, Frame::Close);
    let served = client.task.await.expect("join").expect("served");
    assert_eq!(served, conn_id);
}

#[tokio::test]
async fn test_dead_writer_stops_reader() {
    let hub = hub();
    let TestClient {
        outbound,
        inbound,
        task,
    } = TestClient::connect(&hub, UserId::new());
    // The peer stops reading; the first write fails.
    drop(inbound);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("reader cancelled")
        .expect("join")
        .expect("served");
    assert_eq!(hub.connection_count().await, 0);
    drop(outbound);
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_hits_read_deadline() {
    let hub = hub();
    let TestClient {
        outbound,
        inbound,
        task,
    } = TestClient::connect(&hub, UserId::new());

    // Nothing is sent; keepalive pings go out until the deadline closes the connection.
    task.await.expect("join").expect("served");
    assert_eq!(hub.connection_count().await, 0);

    let frames: Vec<Frame> = inbound.collect().await;
    assert!(matches!(frames.first(), Some(Frame::Text(_))));
    assert!(frames.contains(&Frame::Ping));
    assert_eq!(frames.last(), Some(&Frame::Close));
    drop(outbound);
}

#[tokio::test(start_paused = true)]
async fn test_active_client_outlives_read_deadline() {
    let hub = hub();
    let client = TestClient::connect(&hub, UserId::new());

    tokio::time::sleep(Duration::from_secs(50)).await;
    client
        .outbound
        .unbounded_send(Ok(Frame::Pong))
        .expect("open");
    tokio::time::sleep(Duration::from_secs(20)).await;

    // 70s in, but the pong at 50s restarted the 60s deadline.
    assert_eq!(hub.connection_count().await, 1);

    drop(client.outbound);
    client.task.await.expect("join").expect("served");
    assert_eq!(hub.connection_count().await, 0);
}
