//! Individual realtime connection handle.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};

use filehub_core::types::{ConnectionId, UserId};

/// Lifecycle of one connection.
///
/// `connecting → active → closing → closed`; states only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake in progress, not yet registered.
    Connecting = 0,
    /// Registered and exchanging frames.
    Active = 1,
    /// One path has ended; teardown in progress.
    Closing = 2,
    /// Both paths have exited.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Identity and lifecycle state of a realtime connection.
///
/// The outbound buffer is not stored here: the registry owns its sending
/// half and the write pump owns the receiving half.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection (session) ID.
    pub id: ConnectionId,
    /// User who owns this connection.
    pub user_id: UserId,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
    state: AtomicU8,
}

impl ConnectionHandle {
    /// Create a handle in the `connecting` state.
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            connected_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Advance the lifecycle. Moving backwards is ignored.
    pub fn advance(&self, next: ConnectionState) {
        self.state.fetch_max(next as u8, Ordering::SeqCst);
    }

    /// Whether the connection is still exchanging frames.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }
}
