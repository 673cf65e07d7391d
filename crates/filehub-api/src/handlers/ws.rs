//! WebSocket upgrade handler.
//!
//! Adapts axum's socket to the hub's transport-neutral [`Frame`] stream and
//! sink, then hands the connection to [`serve_connection`].

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt, future};
use tracing::{info, warn};

use filehub_core::types::UserId;
use filehub_realtime::{Frame, serve_connection};

use crate::dto::WsQuery;
use crate::state::AppState;

/// GET /ws?user_id={uuid}
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws_connection(state, query.user_id, socket))
}

/// Runs an established WebSocket connection until either side ends it.
async fn handle_ws_connection(state: AppState, user_id: UserId, socket: WebSocket) {
    let (ws_tx, ws_rx) = socket.split();

    let stream = ws_rx.map(|result| result.map(into_frame));
    let sink = ws_tx.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_message(frame))));

    match serve_connection(state.hub.clone(), user_id, stream, sink).await {
        Ok(conn_id) => {
            info!(conn_id = %conn_id, user_id = %user_id, "WebSocket session finished");
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "WebSocket connection rejected");
        }
    }
}

fn into_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Ping(_) => Frame::Ping,
        Message::Pong(_) => Frame::Pong,
        Message::Close(_) => Frame::Close,
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping => Message::Ping(Default::default()),
        Frame::Pong => Message::Pong(Default::default()),
        Frame::Close => Message::Close(None),
    }
}
