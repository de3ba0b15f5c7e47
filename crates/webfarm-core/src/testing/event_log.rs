use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::cluster::{EventLog, FarmEventType, NodeId, NodeLogEntry};
use crate::error::Result;

/// Event log that keeps entries in memory for later verification.
pub struct MemoryEventLog {
    entries: RwLock<Vec<NodeLogEntry>>,
    next_id: AtomicI64,
}

impl MemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Get all entries in append order.
    pub fn entries(&self) -> Vec<NodeLogEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Get entries of one event type.
    pub fn entries_of_type(&self, event_type: FarmEventType) -> Vec<NodeLogEntry> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Count entries of one event type about one node.
    pub fn count_for(&self, event_type: FarmEventType, subject: NodeId) -> usize {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type && e.node_id == subject)
            .count()
    }

    /// Assert that an entry of this type was written about `subject`.
    pub fn assert_logged(&self, event_type: FarmEventType, subject: NodeId) {
        let entries = self.entries.read().unwrap();
        let found = entries
            .iter()
            .any(|e| e.event_type == event_type && e.node_id == subject);
        assert!(
            found,
            "Expected a {} entry for node {}, found {:?}",
            event_type,
            subject,
            entries
                .iter()
                .map(|e| (e.event_type, e.node_id))
                .collect::<Vec<_>>()
        );
    }

    /// Assert that an entry of this type containing `text` was written about `subject`.
    pub fn assert_logged_with(&self, event_type: FarmEventType, subject: NodeId, text: &str) {
        let entries = self.entries.read().unwrap();
        let found = entries
            .iter()
            .any(|e| e.event_type == event_type && e.node_id == subject && e.message.contains(text));
        assert!(
            found,
            "Expected a {} entry for node {} containing '{}'",
            event_type, subject, text
        );
    }

    /// Assert that no entry of this type was written about `subject`.
    pub fn assert_not_logged(&self, event_type: FarmEventType, subject: NodeId) {
        let count = self.count_for(event_type, subject);
        assert_eq!(
            count, 0,
            "Expected no {} entries for node {}, found {}",
            event_type, subject, count
        );
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(
        &self,
        writer: NodeId,
        subject: NodeId,
        event_type: FarmEventType,
        message: &str,
    ) -> Result<()> {
        let entry = NodeLogEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            writer_node_id: writer,
            node_id: subject,
            event_type,
            message: message.to_string(),
            created_at: Utc::now(),
        };

        self.entries.write().unwrap().push(entry);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<NodeLogEntry>> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
