use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::NodeId;

/// Kind of farm event, used both on the message channel and in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FarmEventType {
    Startup,
    Shutdown,
    Warning,
    Ping,
    Pong,
}

impl FarmEventType {
    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "Startup",
            Self::Shutdown => "Shutdown",
            Self::Warning => "Warning",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Startup" => Some(Self::Startup),
            "Shutdown" => Some(Self::Shutdown),
            "Warning" => Some(Self::Warning),
            "Ping" => Some(Self::Ping),
            "Pong" => Some(Self::Pong),
            _ => None,
        }
    }

    /// All event types.
    pub fn all() -> [Self; 5] {
        [
            Self::Startup,
            Self::Shutdown,
            Self::Warning,
            Self::Ping,
            Self::Pong,
        ]
    }
}

impl std::fmt::Display for FarmEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Envelope exchanged between nodes over the message channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmMessage {
    /// Unique message ID.
    pub id: Uuid,
    /// Name of the node that published the message.
    pub sender: String,
    /// Event carried by the message.
    pub event_type: FarmEventType,
    /// Addressee for unicast messages. `None` means every node.
    #[serde(default)]
    pub recipient: Option<String>,
    /// Free-form payload text.
    #[serde(default)]
    pub payload: String,
    /// When the message was published.
    pub sent_at: DateTime<Utc>,
}

impl FarmMessage {
    /// Create a message for every node.
    pub fn broadcast(
        sender: impl Into<String>,
        event_type: FarmEventType,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            event_type,
            recipient: None,
            payload: payload.into(),
            sent_at: Utc::now(),
        }
    }

    /// Create a message for a single node.
    pub fn unicast(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        event_type: FarmEventType,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            recipient: Some(recipient.into()),
            ..Self::broadcast(sender, event_type, payload)
        }
    }

    /// Whether the message is meant for the named node.
    pub fn is_addressed_to(&self, node_name: &str) -> bool {
        match self.recipient.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(recipient) => recipient == node_name,
        }
    }
}

/// An immutable entry in the farm event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLogEntry {
    /// Log entry ID.
    pub id: i64,
    /// Node that wrote the entry.
    pub writer_node_id: NodeId,
    /// Node the entry is about.
    pub node_id: NodeId,
    /// Event type.
    pub event_type: FarmEventType,
    /// Message text.
    pub message: String,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}
