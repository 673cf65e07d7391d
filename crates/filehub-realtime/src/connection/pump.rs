//! Per-connection read and write pumps.
//!
//! The inbound path runs on the caller's task; the outbound path is spawned.
//! Whichever path ends first brings the other one down: the reader's exit
//! unregisters the connection, closing the outbound buffer, and the writer's
//! exit cancels the reader.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use filehub_core::result::AppResult;
use filehub_core::types::{ConnectionId, UserId};

use crate::hub::Hub;
use crate::message::types::Reply;

use super::frame::Frame;
use super::handle::{ConnectionHandle, ConnectionState};

/// Runs one connection from handshake to teardown.
///
/// Registers the connection, queues the `connected` acknowledgment, then
/// pumps frames until either side ends. Returns once the connection has
/// been unregistered and the outbound path has exited.
pub async fn serve_connection<S, K, E>(
    hub: Hub,
    user_id: UserId,
    stream: S,
    sink: K,
) -> AppResult<ConnectionId>
where
    S: Stream<Item = Result<Frame, E>> + Unpin + Send,
    E: Display,
    K: Sink<Frame> + Unpin + Send + 'static,
    K::Error: Display,
{
    let handle = Arc::new(ConnectionHandle::new(user_id));
    let conn_id = handle.id;
    let buffer = hub.register(handle.clone()).await?;
    hub.send_to(conn_id, &Reply::connected(conn_id, user_id))
        .await;

    let heartbeat = hub.heartbeat();
    let cancel = CancellationToken::new();
    let writer = tokio::spawn(write_pump(
        conn_id,
        sink,
        buffer,
        heartbeat.ping_interval,
        cancel.clone(),
    ));

    read_pump(&hub, conn_id, stream, heartbeat.read_deadline(), cancel).await;

    hub.unregister(conn_id).await;
    if let Err(e) = writer.await {
        debug!(conn_id = %conn_id, error = %e, "Outbound task ended abnormally");
    }
    handle.advance(ConnectionState::Closed);

    info!(conn_id = %conn_id, user_id = %user_id, "Connection closed");
    Ok(conn_id)
}

/// Reads frames until the peer leaves, the read deadline passes, or the
/// outbound path cancels it.
async fn read_pump<S, E>(
    hub: &Hub,
    conn_id: ConnectionId,
    mut stream: S,
    deadline: Duration,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conn_id = %conn_id, "Outbound path ended, stopping reader");
                return;
            }
            next = tokio::time::timeout(deadline, stream.next()) => next,
        };

        match next {
            Err(_) => {
                info!(
                    conn_id = %conn_id,
                    deadline_secs = deadline.as_secs(),
                    "No frame within read deadline"
                );
                return;
            }
            Ok(None) | Ok(Some(Ok(Frame::Close))) => {
                debug!(conn_id = %conn_id, "Peer closed connection");
                return;
            }
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn_id, error = %e, "Read error");
                return;
            }
            Ok(Some(Ok(Frame::Text(text)))) => hub.handle_inbound(conn_id, &text).await,
            // Any other frame is proof of life; the deadline restarts.
            Ok(Some(Ok(_))) => {}
        }
    }
}

/// Drains the outbound buffer into the sink and writes keepalive pings.
async fn write_pump<K>(
    conn_id: ConnectionId,
    mut sink: K,
    mut buffer: mpsc::Receiver<String>,
    ping_interval: Duration,
    cancel: CancellationToken,
) where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let _reader_guard = cancel.drop_guard();
    let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            message = buffer.recv() => match message {
                Some(text) => Frame::Text(text),
                None => {
                    // Unregistered: the registry dropped the sending half.
                    if let Err(e) = sink.send(Frame::Close).await {
                        debug!(conn_id = %conn_id, error = %e, "Failed to write close frame");
                    }
                    break;
                }
            },
            _ = keepalive.tick() => Frame::Ping,
        };

        if let Err(e) = sink.send(frame).await {
            debug!(conn_id = %conn_id, error = %e, "Write failed");
            break;
        }
    }

    let _ = sink.close().await;
}
