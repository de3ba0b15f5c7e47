use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::cluster::{FarmEventType, FarmMessage, MessageChannel};
use crate::error::Result;

/// In-process message channel shared by several nodes.
///
/// Clones share the same underlying channel, so handing one clone to each
/// coordinator connects them the way the real bus would. Every published
/// message is recorded for verification.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<FarmMessage>,
    published: Arc<RwLock<Vec<FarmMessage>>>,
}

impl LocalBus {
    /// Create a new bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            published: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get all published messages in publish order.
    pub fn published(&self) -> Vec<FarmMessage> {
        self.published.read().unwrap().clone()
    }

    /// Count messages of one type published by `sender`.
    pub fn count(&self, sender: &str, event_type: FarmEventType) -> usize {
        self.published
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.sender == sender && m.event_type == event_type)
            .count()
    }

    /// Assert that `sender` published a message of this type.
    pub fn assert_published(&self, sender: &str, event_type: FarmEventType) {
        let messages = self.published.read().unwrap();
        let found = messages
            .iter()
            .any(|m| m.sender == sender && m.event_type == event_type);
        assert!(
            found,
            "Expected '{}' to publish {}, published: {:?}",
            sender,
            event_type,
            messages
                .iter()
                .map(|m| (m.sender.as_str(), m.event_type))
                .collect::<Vec<_>>()
        );
    }

    /// Assert that `sender` published no message of this type.
    pub fn assert_not_published(&self, sender: &str, event_type: FarmEventType) {
        let count = self.count(sender, event_type);
        assert_eq!(
            count, 0,
            "Expected '{}' NOT to publish {}, but it did {} time(s)",
            sender, event_type, count
        );
    }

    /// Clear recorded messages.
    pub fn clear(&self) {
        self.published.write().unwrap().clear();
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for LocalBus {
    async fn publish(&self, message: FarmMessage) -> Result<()> {
        self.published.write().unwrap().push(message.clone());
        // No subscribers is not an error; nobody else is listening yet.
        let _ = self.tx.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FarmMessage> {
        self.tx.subscribe()
    }
}
