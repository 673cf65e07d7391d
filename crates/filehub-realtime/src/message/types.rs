//! Inbound command and outbound envelope definitions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use filehub_core::types::{ConnectionId, FolderId, UserId};

/// Command envelope sent by the client.
///
/// `action` stays a string so an unrecognized action still decodes and can
/// be logged by name instead of failing as malformed JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Requested action, e.g. `"subscribe"`.
    pub action: String,
    /// Target folder; absent means the root folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    /// Free-form client data, ignored by the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Actions the hub understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Add a folder subscription.
    Subscribe,
    /// Remove a folder subscription.
    Unsubscribe,
    /// Application-level liveness check.
    Ping,
}

impl Action {
    /// The wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
        }
    }
}

impl Command {
    /// Build a command for `action`.
    pub fn new(action: Action, folder_id: Option<FolderId>) -> Self {
        Self {
            action: action.as_str().to_string(),
            folder_id,
            data: None,
        }
    }

    /// The recognized action, if any.
    pub fn action(&self) -> Option<Action> {
        match self.action.as_str() {
            "subscribe" => Some(Action::Subscribe),
            "unsubscribe" => Some(Action::Unsubscribe),
            "ping" => Some(Action::Ping),
            _ => None,
        }
    }
}

/// A state-change notification fanned out to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type tag, e.g. `"file_created"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event body.
    #[serde(default)]
    pub payload: Value,
    /// User the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            user_id: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Target the event at a user.
    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Hub-originated message addressed to a single connection: the handshake
/// acknowledgment, command acknowledgments, and protocol errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// `"connected"`, `"ack"` or `"error"`.
    #[serde(rename = "type")]
    pub reply_type: String,
    /// Reply body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Owner of the connection, on `connected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

impl Reply {
    fn new(reply_type: &str, data: Value) -> Self {
        Self {
            reply_type: reply_type.to_string(),
            data: Some(data),
            user_id: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Handshake acknowledgment carrying the session id.
    pub fn connected(conn_id: ConnectionId, user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(
                "connected",
                json!({ "session_id": conn_id, "user_id": user_id }),
            )
        }
    }

    /// Acknowledgment of a subscribe/unsubscribe command.
    pub fn ack(action: Action, folder_id: Option<FolderId>) -> Self {
        Self::new(
            "ack",
            json!({ "action": action.as_str(), "folder_id": folder_id }),
        )
    }

    /// Answer to a `ping` command.
    pub fn pong() -> Self {
        Self::new("ack", json!({ "action": "pong" }))
    }

    /// A protocol-level rejection.
    pub fn error(code: &str, message: &str) -> Self {
        Self::new("error", json!({ "code": code, "message": message }))
    }
}
