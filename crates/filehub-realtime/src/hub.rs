//! The hub: registry orchestration, inbound command handling and broadcast.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use filehub_core::config::RealtimeConfig;
use filehub_core::error::ErrorKind;
use filehub_core::result::AppResult;
use filehub_core::types::{ConnectionId, FolderId, UserId};

use crate::connection::handle::{ConnectionHandle, ConnectionState};
use crate::connection::heartbeat::HeartbeatConfig;
use crate::message::serializer::{decode_command, encode};
use crate::message::types::{Action, Command, Event, Reply};
use crate::registry::{Delivery, FolderKey, Registry};

/// Central real-time hub shared by every connection task and by the
/// application code that emits events.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    config: Arc<RealtimeConfig>,
}

impl Hub {
    /// Creates a hub with an empty registry.
    pub fn new(config: RealtimeConfig) -> Self {
        let registry = Arc::new(Registry::new(
            config.channel_buffer_size,
            config.max_subscriptions_per_connection,
        ));
        info!(
            buffer = config.channel_buffer_size,
            max_subscriptions = config.max_subscriptions_per_connection,
            "Real-time hub initialized"
        );
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    /// Realtime configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Keepalive timing for connection pumps.
    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig::from(self.config.as_ref())
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Registers a connection and marks it active.
    pub async fn register(
        &self,
        handle: Arc<ConnectionHandle>,
    ) -> AppResult<mpsc::Receiver<String>> {
        let receiver = self.registry.register(handle.clone()).await?;
        handle.advance(ConnectionState::Active);
        Ok(receiver)
    }

    /// Unregisters a connection. Safe to call more than once.
    pub async fn unregister(&self, conn_id: ConnectionId) {
        if let Some(handle) = self.registry.unregister(conn_id).await {
            handle.advance(ConnectionState::Closing);
        }
    }

    /// Subscribes a connection to a folder (`None` = root).
    pub async fn subscribe_folder(
        &self,
        conn_id: ConnectionId,
        folder_id: Option<FolderId>,
    ) -> AppResult<bool> {
        self.registry
            .subscribe(conn_id, FolderKey::from(folder_id))
            .await
    }

    /// Unsubscribes a connection from a folder (`None` = root).
    pub async fn unsubscribe_folder(
        &self,
        conn_id: ConnectionId,
        folder_id: Option<FolderId>,
    ) -> AppResult<bool> {
        self.registry
            .unsubscribe(conn_id, FolderKey::from(folder_id))
            .await
    }

    /// Fans an event out to every connection subscribed to `folder_id`.
    ///
    /// The event is serialized once. Full buffers drop the message for that
    /// connection only.
    pub async fn broadcast(&self, event: &Event, folder_id: Option<FolderId>) -> Delivery {
        let key = FolderKey::from(folder_id);
        let Some(text) = serialize(event) else {
            return Delivery::default();
        };
        let delivery = self.registry.deliver_to_folder(&key, &text).await;
        debug!(
            event_type = %event.event_type,
            folder = %key,
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Broadcast to folder"
        );
        delivery
    }

    /// Fans an event out to every connection of `event.user_id`.
    ///
    /// An event without a target user reaches nobody.
    pub async fn broadcast_to_user(&self, event: &Event) -> Delivery {
        let Some(user_id) = event.user_id else {
            warn!(event_type = %event.event_type, "User broadcast without target user");
            return Delivery::default();
        };
        self.send_to_user(user_id, event).await
    }

    /// Fans an event out to every connection owned by `user_id`.
    pub async fn send_to_user(&self, user_id: UserId, event: &Event) -> Delivery {
        let Some(text) = serialize(event) else {
            return Delivery::default();
        };
        let delivery = self.registry.deliver_to_user(user_id, &text).await;
        debug!(
            event_type = %event.event_type,
            user_id = %user_id,
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Broadcast to user"
        );
        delivery
    }

    /// Fans an event out to every registered connection.
    pub async fn broadcast_all(&self, event: &Event) -> Delivery {
        let Some(text) = serialize(event) else {
            return Delivery::default();
        };
        let delivery = self.registry.deliver_to_all(&text).await;
        info!(
            event_type = %event.event_type,
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Broadcast to all connections"
        );
        delivery
    }

    /// Queues a reply on a single connection.
    pub async fn send_to(&self, conn_id: ConnectionId, reply: &Reply) -> bool {
        match serialize(reply) {
            Some(text) => self.registry.deliver_to(conn_id, text).await,
            None => false,
        }
    }

    /// Processes one inbound text frame from a connection.
    ///
    /// Malformed envelopes and unknown actions are logged and ignored.
    pub async fn handle_inbound(&self, conn_id: ConnectionId, raw: &str) {
        let command = match decode_command(raw) {
            Ok(command) => command,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "Ignoring malformed message");
                return;
            }
        };

        match command.action() {
            Some(Action::Subscribe) => self.handle_subscribe(conn_id, &command).await,
            Some(Action::Unsubscribe) => self.handle_unsubscribe(conn_id, &command).await,
            Some(Action::Ping) => {
                self.send_to(conn_id, &Reply::pong()).await;
            }
            None => {
                warn!(conn_id = %conn_id, action = %command.action, "Ignoring unknown action");
            }
        }
    }

    async fn handle_subscribe(&self, conn_id: ConnectionId, command: &Command) {
        match self.subscribe_folder(conn_id, command.folder_id).await {
            Ok(_) => {
                self.send_to(conn_id, &Reply::ack(Action::Subscribe, command.folder_id))
                    .await;
            }
            Err(e) if e.is(ErrorKind::Validation) => {
                warn!(conn_id = %conn_id, error = %e, "Subscription rejected");
                self.send_to(conn_id, &Reply::error("MAX_SUBSCRIPTIONS", &e.message))
                    .await;
            }
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "Subscribe failed");
            }
        }
    }

    async fn handle_unsubscribe(&self, conn_id: ConnectionId, command: &Command) {
        match self.unsubscribe_folder(conn_id, command.folder_id).await {
            Ok(_) => {
                self.send_to(conn_id, &Reply::ack(Action::Unsubscribe, command.folder_id))
                    .await;
            }
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "Unsubscribe failed");
            }
        }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }

    /// Unregisters every connection; each outbound path writes a close frame
    /// and exits.
    pub async fn shutdown(&self) {
        info!("Shutting down real-time hub");
        let closed = self.registry.unregister_all().await;
        for handle in &closed {
            handle.advance(ConnectionState::Closing);
        }
        info!(count = closed.len(), "All connections closed");
    }
}

fn serialize<T: serde::Serialize>(message: &T) -> Option<String> {
    match encode(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = %e, "Failed to serialize outbound message");
            None
        }
    }
}
