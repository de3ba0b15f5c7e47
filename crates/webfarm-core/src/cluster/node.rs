use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::interval::PollingInterval;

/// Node identifier assigned by the node registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
    /// Create from a registry key.
    pub fn from_i64(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner registry key.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One running instance of the host application, as recorded in the node registry.
///
/// Records are keyed by `name`, created the first time a machine identity starts,
/// reused across restarts and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Registry-assigned identifier.
    pub id: NodeId,
    /// Unique node name.
    pub name: String,
    /// Whether the node is believed to be alive.
    pub is_active: bool,
    /// Whether the node asserted leadership most recently.
    pub is_leader: bool,
    /// Whether the node is configured to run jobs.
    pub is_current_job_runner: bool,
    /// Operator override for the polling interval.
    pub configured_polling_interval: Option<PollingInterval>,
    /// Polling interval negotiated at the node's last startup.
    pub current_polling_interval: Option<PollingInterval>,
    /// Last time the node was seen alive.
    pub last_seen_at: DateTime<Utc>,
    /// Last time the node started.
    pub last_restart_at: Option<DateTime<Utc>>,
    /// When the node last stopped gracefully. `None` while running.
    pub stopped_at: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Create a record for a node that has never been registered.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::default(),
            name: name.into(),
            is_active: false,
            is_leader: false,
            is_current_job_runner: false,
            configured_polling_interval: None,
            current_polling_interval: None,
            last_seen_at: Utc::now(),
            last_restart_at: None,
            stopped_at: None,
        }
    }

    /// Whether the node stopped gracefully the last time it ran.
    pub fn stopped_cleanly(&self) -> bool {
        self.stopped_at.is_some()
    }
}

/// Snapshot of the farm built from the node registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FarmSummary {
    /// Registered nodes.
    pub total: usize,
    /// Nodes believed to be alive.
    pub active: usize,
    /// Nodes believed to be down or stopped.
    pub inactive: usize,
    /// Name of the node that asserted leadership most recently.
    pub leader: Option<String>,
    /// Names of nodes configured to run jobs.
    pub job_runners: Vec<String>,
}

impl FarmSummary {
    /// Summarize a list of node records.
    pub fn from_nodes(nodes: &[NodeRecord]) -> Self {
        let active = nodes.iter().filter(|n| n.is_active).count();

        Self {
            total: nodes.len(),
            active,
            inactive: nodes.len() - active,
            leader: nodes
                .iter()
                .find(|n| n.is_leader)
                .map(|n| n.name.clone()),
            job_runners: nodes
                .iter()
                .filter(|n| n.is_current_job_runner)
                .map(|n| n.name.clone())
                .collect(),
        }
    }
}
