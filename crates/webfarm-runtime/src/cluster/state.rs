use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use webfarm_core::cluster::{
    EventLog, FarmEventType, MessageChannel, NodeId, NodeRegistry, PollingInterval,
};
use webfarm_core::config::NodeConfig;
use webfarm_core::Result;

/// Identity of this node, fixed when stage 1 completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    /// Registry ID of this node.
    pub id: NodeId,
    /// Unique node name.
    pub name: String,
    /// Negotiated leadership polling interval.
    pub polling_interval: PollingInterval,
    /// Whether this node is configured to run jobs.
    pub is_job_runner: bool,
}

/// State shared between the lifecycle methods, the poll loop and the message handlers.
pub(crate) struct FarmState {
    pub(crate) registry: Arc<dyn NodeRegistry>,
    pub(crate) event_log: Arc<dyn EventLog>,
    pub(crate) channel: Arc<dyn MessageChannel>,
    local: RwLock<Option<LocalNode>>,
    was_pinged: AtomicBool,
    is_leader: AtomicBool,
    /// Serializes liveness writes made by this process (pong handling and the sweep).
    pub(crate) liveness: Mutex<()>,
}

impl FarmState {
    pub(crate) fn new(
        registry: Arc<dyn NodeRegistry>,
        event_log: Arc<dyn EventLog>,
        channel: Arc<dyn MessageChannel>,
    ) -> Self {
        Self {
            registry,
            event_log,
            channel,
            local: RwLock::new(None),
            was_pinged: AtomicBool::new(false),
            is_leader: AtomicBool::new(false),
            liveness: Mutex::new(()),
        }
    }

    pub(crate) async fn local_node(&self) -> Option<LocalNode> {
        self.local.read().await.clone()
    }

    pub(crate) async fn set_local_node(&self, node: Option<LocalNode>) {
        *self.local.write().await = node;
    }

    /// Record that another node pinged this one.
    pub(crate) fn mark_pinged(&self) {
        self.was_pinged.store(true, Ordering::SeqCst);
    }

    /// Check and clear the pinged flag in one step.
    pub(crate) fn take_was_pinged(&self) -> bool {
        self.was_pinged.swap(false, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn was_pinged(&self) -> bool {
        self.was_pinged.load(Ordering::SeqCst)
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub(crate) fn set_leader(&self, is_leader: bool) {
        self.is_leader.store(is_leader, Ordering::SeqCst);
    }

    pub(crate) fn reset_flags(&self) {
        self.was_pinged.store(false, Ordering::SeqCst);
        self.is_leader.store(false, Ordering::SeqCst);
    }

    /// Append an event log entry written by `writer` about `subject`.
    pub(crate) async fn add_log(
        &self,
        writer: NodeId,
        subject: NodeId,
        event_type: FarmEventType,
        text: &str,
    ) -> Result<()> {
        self.event_log
            .append(writer, subject, event_type, text)
            .await?;
        tracing::debug!(event_type = %event_type, subject = %subject, "Logged {} {}", event_type, text);
        Ok(())
    }

    /// Publish an event from `sender`, to one node or to all of them.
    pub(crate) async fn publish(
        &self,
        sender: &str,
        event_type: FarmEventType,
        recipient: Option<&str>,
        payload: &str,
    ) -> Result<()> {
        tracing::debug!(
            "Sending {} to {}",
            event_type,
            recipient.unwrap_or("all")
        );

        match recipient {
            Some(recipient) => {
                self.channel
                    .unicast(sender, recipient, event_type, payload)
                    .await
            }
            None => self.channel.broadcast(sender, event_type, payload).await,
        }
    }
}

/// Resolve this node's name: the configured override, else the machine hostname.
pub fn resolve_node_name(config: &NodeConfig) -> String {
    if let Some(name) = config.name_override() {
        return name.to_string();
    }

    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
