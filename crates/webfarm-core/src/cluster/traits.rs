use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::event::{FarmEventType, FarmMessage, NodeLogEntry};
use super::interval::PollingInterval;
use super::node::{NodeId, NodeRecord};
use crate::error::Result;

/// Durable table of node records shared by every node in the farm.
///
/// Writes are last-writer-wins at the row level.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Find a node by its unique name.
    async fn find_by_name(&self, name: &str) -> Result<Option<NodeRecord>>;

    /// Insert a new node record and return its assigned ID.
    async fn create(&self, record: &NodeRecord) -> Result<NodeId>;

    /// Overwrite an existing node record, matched by name.
    async fn update(&self, record: &NodeRecord) -> Result<()>;

    /// List every registered node.
    async fn list_all(&self) -> Result<Vec<NodeRecord>>;

    /// Whether any node other than `exclude_name` currently holds `interval`.
    async fn exists_with_interval(
        &self,
        exclude_name: &str,
        interval: PollingInterval,
    ) -> Result<bool>;

    /// Mark `leader_name` as leader, every other node as not leader, and
    /// refresh the leader's last-seen time.
    ///
    /// Only the leadership flags and the leader's last-seen column are touched,
    /// so a concurrent update of another node's liveness is not overwritten.
    /// Registries with a native single-statement form should override this.
    async fn assert_leader(&self, leader_name: &str, seen_at: DateTime<Utc>) -> Result<()> {
        for mut node in self.list_all().await? {
            if node.name == leader_name {
                node.is_leader = true;
                node.last_seen_at = seen_at;
                self.update(&node).await?;
            } else if node.is_leader {
                node.is_leader = false;
                self.update(&node).await?;
            }
        }

        Ok(())
    }
}

/// Append-only log of farm events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an entry written by `writer` about `subject`.
    async fn append(
        &self,
        writer: NodeId,
        subject: NodeId,
        event_type: FarmEventType,
        message: &str,
    ) -> Result<()>;

    /// Most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<NodeLogEntry>>;
}

/// Broadcast/unicast publish-subscribe between farm nodes.
///
/// Delivery is at-least-once with no ordering guarantee.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publish a message.
    async fn publish(&self, message: FarmMessage) -> Result<()>;

    /// Subscribe to inbound messages, including this node's own.
    fn subscribe(&self) -> broadcast::Receiver<FarmMessage>;

    /// Publish an event to every node.
    async fn broadcast(
        &self,
        sender: &str,
        event_type: FarmEventType,
        payload: &str,
    ) -> Result<()> {
        self.publish(FarmMessage::broadcast(sender, event_type, payload))
            .await
    }

    /// Publish an event to a single node.
    async fn unicast(
        &self,
        sender: &str,
        recipient: &str,
        event_type: FarmEventType,
        payload: &str,
    ) -> Result<()> {
        self.publish(FarmMessage::unicast(sender, recipient, event_type, payload))
            .await
    }
}
