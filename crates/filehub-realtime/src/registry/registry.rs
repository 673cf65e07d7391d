//! Connection registry: the active set and the folder subscription index
//! behind a single lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::types::{ConnectionId, UserId};

use crate::connection::handle::ConnectionHandle;

use super::types::{Delivery, FolderKey};

/// A registered connection.
#[derive(Debug)]
struct Entry {
    handle: Arc<ConnectionHandle>,
    /// Sending half of the outbound buffer. Dropping it closes the buffer.
    sender: mpsc::Sender<String>,
    /// Reverse index of this connection's subscriptions.
    folders: HashSet<FolderKey>,
}

/// Both maps live in one struct so every mutation sees them consistently.
#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Entry>,
    folders: HashMap<FolderKey, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn remove_edge(&mut self, key: &FolderKey, conn_id: ConnectionId) {
        if let Some(subscribers) = self.folders.get_mut(key) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                self.folders.remove(key);
            }
        }
    }
}

/// Registry of active connections and their folder subscriptions.
#[derive(Debug)]
pub struct Registry {
    state: RwLock<RegistryState>,
    /// Outbound buffer capacity for new connections.
    buffer_size: usize,
    /// Subscription limit per connection.
    max_subscriptions: usize,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new(buffer_size: usize, max_subscriptions: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            buffer_size: buffer_size.max(1),
            max_subscriptions,
        }
    }

    /// Adds a connection to the active set and creates its outbound buffer.
    ///
    /// Returns the receiving half of the buffer. The connection starts
    /// without any folder subscription.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> AppResult<mpsc::Receiver<String>> {
        let mut state = self.state.write().await;
        if state.connections.contains_key(&handle.id) {
            return Err(AppError::conflict(format!(
                "Connection {} is already registered",
                handle.id
            )));
        }

        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let conn_id = handle.id;
        let user_id = handle.user_id;
        state.connections.insert(
            conn_id,
            Entry {
                handle,
                sender,
                folders: HashSet::new(),
            },
        );

        info!(
            conn_id = %conn_id,
            user_id = %user_id,
            active = state.connections.len(),
            "Connection registered"
        );
        Ok(receiver)
    }

    /// Removes a connection and every subscription it held, closing its
    /// outbound buffer. Returns `None` if it was not registered.
    pub async fn unregister(&self, conn_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let mut state = self.state.write().await;
        let entry = state.connections.remove(&conn_id)?;
        for key in &entry.folders {
            state.remove_edge(key, conn_id);
        }

        info!(
            conn_id = %conn_id,
            user_id = %entry.handle.user_id,
            subscriptions = entry.folders.len(),
            active = state.connections.len(),
            "Connection unregistered"
        );
        Some(entry.handle)
    }

    /// Removes every connection, closing all outbound buffers.
    pub async fn unregister_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut state = self.state.write().await;
        state.folders.clear();
        state
            .connections
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect()
    }

    /// Adds a subscription edge. Returns `false` if it already existed.
    pub async fn subscribe(&self, conn_id: ConnectionId, key: FolderKey) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&conn_id)
            .ok_or_else(|| AppError::not_found(format!("Connection {conn_id} is not registered")))?;

        if entry.folders.contains(&key) {
            return Ok(false);
        }
        if entry.folders.len() >= self.max_subscriptions {
            return Err(AppError::validation(format!(
                "Maximum subscriptions ({}) reached",
                self.max_subscriptions
            )));
        }

        entry.folders.insert(key);
        state.folders.entry(key).or_default().insert(conn_id);
        debug!(conn_id = %conn_id, folder = %key, "Subscribed to folder");
        Ok(true)
    }

    /// Removes a subscription edge. Returns `false` if it did not exist.
    pub async fn unsubscribe(&self, conn_id: ConnectionId, key: FolderKey) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&conn_id)
            .ok_or_else(|| AppError::not_found(format!("Connection {conn_id} is not registered")))?;

        if !entry.folders.remove(&key) {
            return Ok(false);
        }
        state.remove_edge(&key, conn_id);
        debug!(conn_id = %conn_id, folder = %key, "Unsubscribed from folder");
        Ok(true)
    }

    /// Queues `text` on every connection subscribed to `key`.
    pub async fn deliver_to_folder(&self, key: &FolderKey, text: &str) -> Delivery {
        let state = self.state.read().await;
        let Some(subscribers) = state.folders.get(key) else {
            return Delivery::default();
        };
        fan_out(
            subscribers
                .iter()
                .filter_map(|id| state.connections.get(id)),
            text,
        )
    }

    /// Queues `text` on every connection owned by `user_id`.
    pub async fn deliver_to_user(&self, user_id: UserId, text: &str) -> Delivery {
        let state = self.state.read().await;
        fan_out(
            state
                .connections
                .values()
                .filter(|entry| entry.handle.user_id == user_id),
            text,
        )
    }

    /// Queues `text` on every registered connection.
    pub async fn deliver_to_all(&self, text: &str) -> Delivery {
        let state = self.state.read().await;
        fan_out(state.connections.values(), text)
    }

    /// Queues `text` on a single connection. Returns whether it was queued.
    pub async fn deliver_to(&self, conn_id: ConnectionId, text: String) -> bool {
        let state = self.state.read().await;
        match state.connections.get(&conn_id) {
            Some(entry) => try_enqueue(entry, text),
            None => false,
        }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Whether a connection is registered.
    pub async fn contains(&self, conn_id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&conn_id)
    }

    /// Number of connections subscribed to a folder.
    pub async fn subscriber_count(&self, key: &FolderKey) -> usize {
        self.state
            .read()
            .await
            .folders
            .get(key)
            .map_or(0, HashSet::len)
    }

    /// The folders a connection is subscribed to.
    pub async fn subscriptions(&self, conn_id: ConnectionId) -> Vec<FolderKey> {
        self.state
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|entry| entry.folders.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Checks that the forward and reverse indexes agree and that no folder
    /// edge points at an unregistered connection.
    pub async fn check_consistency(&self) -> Result<(), String> {
        let state = self.state.read().await;
        for (key, subscribers) in &state.folders {
            if subscribers.is_empty() {
                return Err(format!("empty subscriber set left for {key}"));
            }
            for conn_id in subscribers {
                let entry = state
                    .connections
                    .get(conn_id)
                    .ok_or_else(|| format!("{key} references unregistered {conn_id}"))?;
                if !entry.folders.contains(key) {
                    return Err(format!("{conn_id} missing reverse edge for {key}"));
                }
            }
        }
        for (conn_id, entry) in &state.connections {
            for key in &entry.folders {
                let indexed = state
                    .folders
                    .get(key)
                    .is_some_and(|subscribers| subscribers.contains(conn_id));
                if !indexed {
                    return Err(format!("{conn_id} subscribed to {key} but not indexed"));
                }
            }
        }
        Ok(())
    }
}

fn fan_out<'a>(entries: impl Iterator<Item = &'a Entry>, text: &str) -> Delivery {
    let mut delivery = Delivery::default();
    for entry in entries {
        if try_enqueue(entry, text.to_owned()) {
            delivery.delivered += 1;
        } else {
            delivery.dropped += 1;
        }
    }
    delivery
}

/// Never waits: a full or closed buffer drops the message for this
/// connection only.
fn try_enqueue(entry: &Entry, text: String) -> bool {
    match entry.sender.try_send(text) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(conn_id = %entry.handle.id, "Outbound buffer full, dropping message");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(conn_id = %entry.handle.id, "Outbound buffer closed, dropping message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use filehub_core::error::ErrorKind;
    use filehub_core::types::FolderId;

    use super::*;

    fn handle(user_id: UserId) -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle::new(user_id))
    }

    #[tokio::test]
    async fn test_register_does_not_subscribe() {
        let registry = Registry::new(8, 10);
        let conn = handle(UserId::new());
        let _rx = registry.register(conn.clone()).await.expect("register");

        assert!(registry.contains(conn.id).await);
        assert!(registry.subscriptions(conn.id).await.is_empty());
        assert_eq!(registry.subscriber_count(&FolderKey::Root).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let registry = Registry::new(8, 10);
        let conn = handle(UserId::new());
        let _rx = registry.register(conn.clone()).await.expect("register");

        let err = registry.register(conn).await.expect_err("duplicate");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let registry = Registry::new(8, 10);
        let conn = handle(UserId::new());
        let _rx = registry.register(conn.clone()).await.expect("register");
        let key = FolderKey::Folder(FolderId::new());

        assert!(registry.subscribe(conn.id, key).await.expect("first"));
        assert!(!registry.subscribe(conn.id, key).await.expect("second"));
        assert_eq!(registry.subscriber_count(&key).await, 1);

        assert!(registry.unsubscribe(conn.id, key).await.expect("first"));
        assert!(!registry.unsubscribe(conn.id, key).await.expect("second"));
        assert_eq!(registry.subscriber_count(&key).await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_requires_registration() {
        let registry = Registry::new(8, 10);
        let err = registry
            .subscribe(ConnectionId::new(), FolderKey::Root)
            .await
            .expect_err("unregistered");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_subscription_limit() {
        let registry = Registry::new(8, 2);
        let conn = handle(UserId::new());
        let _rx = registry.register(conn.clone()).await.expect("register");

        registry.subscribe(conn.id, FolderKey::Root).await.expect("1");
        registry
            .subscribe(conn.id, FolderKey::Folder(FolderId::new()))
            .await
            .expect("2");
        let err = registry
            .subscribe(conn.id, FolderKey::Folder(FolderId::new()))
            .await
            .expect_err("limit");
        assert_eq!(err.kind, ErrorKind::Validation);
        // Re-subscribing to an existing folder is not a new edge.
        assert!(!registry.subscribe(conn.id, FolderKey::Root).await.expect("existing"));
    }

    #[tokio::test]
    async fn test_unregister_removes_edges_and_closes_buffer() {
        let registry = Registry::new(8, 10);
        let conn = handle(UserId::new());
        let mut rx = registry.register(conn.clone()).await.expect("register");
        let folder = FolderKey::Folder(FolderId::new());
        registry.subscribe(conn.id, folder).await.expect("subscribe");
        registry.subscribe(conn.id, FolderKey::Root).await.expect("subscribe");

        assert!(registry.unregister(conn.id).await.is_some());
        assert!(registry.unregister(conn.id).await.is_none());
        assert_eq!(registry.subscriber_count(&folder).await, 0);
        assert_eq!(registry.subscriber_count(&FolderKey::Root).await, 0);
        assert!(rx.recv().await.is_none());
        registry.check_consistency().await.expect("consistent");
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let registry = Registry::new(2, 10);
        let conn = handle(UserId::new());
        let mut rx = registry.register(conn.clone()).await.expect("register");
        registry.subscribe(conn.id, FolderKey::Root).await.expect("subscribe");

        for _ in 0..2 {
            let delivery = registry.deliver_to_folder(&FolderKey::Root, "m").await;
            assert_eq!(delivery.delivered, 1);
        }
        let delivery = registry.deliver_to_folder(&FolderKey::Root, "overflow").await;
        assert_eq!(delivery, Delivery { delivered: 0, dropped: 1 });
        assert!(registry.contains(conn.id).await);

        assert_eq!(rx.recv().await.as_deref(), Some("m"));
        assert_eq!(rx.recv().await.as_deref(), Some("m"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_to_user_targets_only_their_connections() {
        let registry = Registry::new(8, 10);
        let alice = UserId::new();
        let a1 = handle(alice);
        let a2 = handle(alice);
        let bob = handle(UserId::new());
        let mut rx_a1 = registry.register(a1).await.expect("a1");
        let mut rx_a2 = registry.register(a2).await.expect("a2");
        let mut rx_bob = registry.register(bob).await.expect("bob");

        let delivery = registry.deliver_to_user(alice, "hi").await;
        assert_eq!(delivery.delivered, 2);
        assert_eq!(rx_a1.recv().await.as_deref(), Some("hi"));
        assert_eq!(rx_a2.recv().await.as_deref(), Some("hi"));
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_random_operation_sequences_stay_consistent() {
        let registry = Registry::new(4, 3);
        let folders: Vec<FolderKey> = std::iter::once(FolderKey::Root)
            .chain((0..3).map(|_| FolderKey::Folder(FolderId::new())))
            .collect();
        let conns: Vec<_> = (0..5).map(|_| handle(UserId::new())).collect();
        let mut receivers = Vec::new();

        let mut rng = StdRng::seed_from_u64(0x2545_f491);
        for _ in 0..500 {
            let conn = &conns[rng.random_range(0..conns.len())];
            let folder = folders[rng.random_range(0..folders.len())];
            match rng.random_range(0..4u8) {
                0 => {
                    if let Ok(rx) = registry.register(conn.clone()).await {
                        receivers.push(rx);
                    }
                }
                1 => {
                    registry.unregister(conn.id).await;
                }
                2 => {
                    let _ = registry.subscribe(conn.id, folder).await;
                }
                _ => {
                    let _ = registry.unsubscribe(conn.id, folder).await;
                }
            }
            registry.check_consistency().await.expect("invariant holds");
        }
    }
}
