use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cluster::{NodeId, NodeRecord, NodeRegistry, PollingInterval};
use crate::error::{FarmError, Result};

/// Node registry backed by a vector, standing in for the shared node table.
///
/// Counts every write so tests can assert that an operation left the
/// registry untouched.
pub struct MemoryNodeRegistry {
    nodes: RwLock<Vec<NodeRecord>>,
    next_id: AtomicI64,
    writes: AtomicUsize,
    reserved_intervals: RwLock<HashSet<PollingInterval>>,
    all_intervals_taken: AtomicBool,
}

impl MemoryNodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            writes: AtomicUsize::new(0),
            reserved_intervals: RwLock::new(HashSet::new()),
            all_intervals_taken: AtomicBool::new(false),
        }
    }

    /// Seed a record without counting it as a write. Returns the assigned ID.
    pub fn insert(&self, mut record: NodeRecord) -> NodeId {
        record.id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let id = record.id;
        self.nodes.write().unwrap().push(record);
        id
    }

    /// Get a copy of a node record.
    pub fn get(&self, name: &str) -> Option<NodeRecord> {
        self.nodes
            .read()
            .unwrap()
            .iter()
            .find(|n| n.name == name)
            .cloned()
    }

    /// Get copies of every node record.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.nodes.read().unwrap().clone()
    }

    /// Number of create/update calls seen so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make an interval look taken by some other node.
    pub fn reserve_interval(&self, interval: PollingInterval) {
        self.reserved_intervals.write().unwrap().insert(interval);
    }

    /// Make every interval look taken by some other node.
    pub fn reserve_all_intervals(&self) {
        self.all_intervals_taken.store(true, Ordering::SeqCst);
    }

    /// Rewrite a record in place without counting it as a write.
    pub fn modify<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut NodeRecord),
    {
        let mut nodes = self.nodes.write().unwrap();
        if let Some(node) = nodes.iter_mut().find(|n| n.name == name) {
            f(node);
        }
    }

    /// Assert that a node is marked active.
    pub fn assert_node_active(&self, name: &str) {
        let node = self.expect_node(name);
        assert!(node.is_active, "Expected node '{}' to be active", name);
    }

    /// Assert that a node is marked inactive.
    pub fn assert_node_inactive(&self, name: &str) {
        let node = self.expect_node(name);
        assert!(!node.is_active, "Expected node '{}' to be inactive", name);
    }

    /// Assert that exactly this node carries the leader flag.
    pub fn assert_sole_leader(&self, name: &str) {
        let nodes = self.nodes.read().unwrap();
        let leaders: Vec<&str> = nodes
            .iter()
            .filter(|n| n.is_leader)
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(
            leaders,
            vec![name],
            "Expected '{}' to be the only leader, found {:?}",
            name,
            leaders
        );
    }

    fn expect_node(&self, name: &str) -> NodeRecord {
        match self.get(name) {
            Some(node) => node,
            None => panic!("Expected node '{}' to be registered", name),
        }
    }
}

impl Default for MemoryNodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRegistry for MemoryNodeRegistry {
    async fn find_by_name(&self, name: &str) -> Result<Option<NodeRecord>> {
        Ok(self.get(name))
    }

    async fn create(&self, record: &NodeRecord) -> Result<NodeId> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.iter().any(|n| n.name == record.name) {
            return Err(FarmError::Validation(format!(
                "Node '{}' is already registered",
                record.name
            )));
        }

        let mut record = record.clone();
        record.id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let id = record.id;
        nodes.push(record);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(id)
    }

    async fn update(&self, record: &NodeRecord) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes
            .iter_mut()
            .find(|n| n.name == record.name)
            .ok_or_else(|| FarmError::NotFound(format!("Node '{}'", record.name)))?;

        *node = NodeRecord {
            id: node.id,
            ..record.clone()
        };
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.nodes())
    }

    async fn exists_with_interval(
        &self,
        exclude_name: &str,
        interval: PollingInterval,
    ) -> Result<bool> {
        if self.all_intervals_taken.load(Ordering::SeqCst)
            || self.reserved_intervals.read().unwrap().contains(&interval)
        {
            return Ok(true);
        }

        Ok(self
            .nodes
            .read()
            .unwrap()
            .iter()
            .any(|n| n.name != exclude_name && n.current_polling_interval == Some(interval)))
    }

    async fn assert_leader(&self, leader_name: &str, seen_at: DateTime<Utc>) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap();
        for node in nodes.iter_mut() {
            node.is_leader = node.name == leader_name;
            if node.is_leader {
                node.last_seen_at = seen_at;
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let registry = MemoryNodeRegistry::new();
        let first = registry.create(&NodeRecord::new("web-01")).await.unwrap();
        let second = registry.create(&NodeRecord::new("web-02")).await.unwrap();
        assert_ne!(first, second);

        let err = registry.create(&NodeRecord::new("web-01")).await.unwrap_err();
        assert!(matches!(err, FarmError::Validation(_)));
        assert_eq!(registry.write_count(), 2);
    }

    #[tokio::test]
    async fn test_update_keeps_assigned_id() {
        let registry = MemoryNodeRegistry::new();
        let id = registry.insert(NodeRecord::new("web-01"));

        let mut record = NodeRecord::new("web-01");
        record.is_active = true;
        registry.update(&record).await.unwrap();

        let stored = registry.get("web-01").unwrap();
        assert_eq!(stored.id, id);
        assert!(stored.is_active);

        let missing = registry.update(&NodeRecord::new("ghost")).await;
        assert!(matches!(missing, Err(FarmError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_interval_lookup_excludes_own_record() {
        let registry = MemoryNodeRegistry::new();
        let mut record = NodeRecord::new("web-01");
        record.current_polling_interval = Some(PollingInterval::from_secs(5));
        registry.insert(record);

        let five = PollingInterval::from_secs(5);
        assert!(!registry.exists_with_interval("web-01", five).await.unwrap());
        assert!(registry.exists_with_interval("web-02", five).await.unwrap());

        let six = PollingInterval::from_secs(6);
        assert!(!registry.exists_with_interval("web-02", six).await.unwrap());
        registry.reserve_interval(six);
        assert!(registry.exists_with_interval("web-02", six).await.unwrap());
    }

    #[test]
    fn test_seeding_is_not_a_write() {
        let registry = MemoryNodeRegistry::new();
        registry.insert(NodeRecord::new("web-01"));
        registry.modify("web-01", |n| n.is_active = true);
        assert_eq!(registry.write_count(), 0);

        let found = tokio_test::block_on(registry.find_by_name("web-01"));
        assert!(tokio_test::assert_ok!(found).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_assert_leader_moves_flag() {
        let registry = MemoryNodeRegistry::new();
        let mut old_leader = NodeRecord::new("web-01");
        old_leader.is_leader = true;
        registry.insert(old_leader);
        registry.insert(NodeRecord::new("web-02"));

        let now = Utc::now();
        registry.assert_leader("web-02", now).await.unwrap();

        registry.assert_sole_leader("web-02");
        assert_eq!(registry.get("web-02").unwrap().last_seen_at, now);
    }
}
