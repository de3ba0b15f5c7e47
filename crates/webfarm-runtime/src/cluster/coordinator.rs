use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use webfarm_core::cluster::{
    EventLog, FarmEventType, FarmMessage, MessageChannel, NodeRecord, NodeRegistry,
};
use webfarm_core::config::{FarmSettings, NodeConfig};
use webfarm_core::{FarmError, Result};

use super::handlers::MessageRouter;
use super::negotiator::PollingIntervalNegotiator;
use super::poller::LeadershipPoller;
#[cfg(test)]
use super::poller::PollOutcome;
use super::state::{resolve_node_name, FarmState, LocalNode};

/// How long shutdown waits for an in-flight poll, and again for in-flight
/// message handlers, before abandoning them.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle stage of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarmStage {
    Stopped,
    Stage1Started,
    Stage2Started,
}

impl std::fmt::Display for FarmStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Stage1Started => write!(f, "stage 1"),
            Self::Stage2Started => write!(f, "stage 2"),
        }
    }
}

/// Configuration read once, when stage 1 runs.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Farm-wide settings.
    pub settings: FarmSettings,
    /// Settings for this node.
    pub node: NodeConfig,
}

struct RunningTasks {
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    listener: JoinHandle<()>,
    handlers: Handlers,
}

/// Message handler tasks started by the inbound loop.
#[derive(Clone)]
struct Handlers {
    tracker: TaskTracker,
    /// Drops handlers still running when the drain timeout expires.
    halt: CancellationToken,
}

impl Handlers {
    fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            halt: CancellationToken::new(),
        }
    }

    fn spawn(&self, state: Arc<FarmState>, router: Arc<MessageRouter>, message: FarmMessage) {
        let halt = self.halt.clone();
        self.tracker.spawn(async move {
            let event_type = message.event_type;
            tokio::select! {
                _ = halt.cancelled() => {
                    tracing::warn!(event_type = %event_type, "Farm message handler abandoned at shutdown");
                }
                result = router.dispatch(state, message) => {
                    if let Err(e) = result {
                        tracing::warn!(event_type = %event_type, error = %e, "Farm message handler failed");
                    }
                }
            }
        });
    }

    /// Wait for running handlers. Call once the inbound loop has stopped.
    async fn drain(self) {
        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                running = self.tracker.len(),
                "Farm message handlers did not finish in time, abandoning them"
            );
            self.halt.cancel();
            self.tracker.wait().await;
        }
    }
}

struct Lifecycle {
    stage: FarmStage,
    /// `None` until stage 1 has evaluated the configuration.
    enabled: Option<bool>,
    running: Option<RunningTasks>,
}

/// Owns this node's participation in the web farm.
///
/// Registration happens in two stages around the host's own warm-up:
/// stage 1 claims a node record and a polling interval, stage 2 marks the
/// node active and starts the leadership poll loop and the inbound message
/// loop. The plain entry points never fail; errors are logged so the host's
/// startup and shutdown are not blocked by farm problems. The `try_*`
/// variants return them instead.
pub struct LeadershipCoordinator {
    state: Arc<FarmState>,
    config: CoordinatorConfig,
    router: Arc<MessageRouter>,
    lifecycle: Mutex<Lifecycle>,
}

impl LeadershipCoordinator {
    /// Create a coordinator over the given collaborators.
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        event_log: Arc<dyn EventLog>,
        channel: Arc<dyn MessageChannel>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            state: Arc::new(FarmState::new(registry, event_log, channel)),
            config,
            router: Arc::new(MessageRouter::with_farm_handlers()),
            lifecycle: Mutex::new(Lifecycle {
                stage: FarmStage::Stopped,
                enabled: None,
                running: None,
            }),
        }
    }

    /// Run stage 1. Returns whether the node registered.
    pub async fn start_stage1(&self) -> bool {
        match self.try_start_stage1().await {
            Ok(registered) => registered,
            Err(e) => {
                tracing::error!(error = %e, "Web farm stage 1 failed");
                false
            }
        }
    }

    /// Run stage 2, logging any failure.
    pub async fn start_stage2(&self) {
        if let Err(e) = self.try_start_stage2().await {
            tracing::error!(error = %e, "Web farm stage 2 failed");
        }
    }

    /// Leave the farm, logging any failure.
    pub async fn shutdown(&self) {
        if let Err(e) = self.try_shutdown().await {
            tracing::error!(error = %e, "Web farm shutdown failed");
        }
    }

    /// Register this node and negotiate its polling interval.
    ///
    /// Returns `Ok(false)` when the farm is disabled for this process: the
    /// farm flag is off, the activation key is missing or malformed, or the
    /// polling bounds are invalid. That decision is made once and sticks.
    pub async fn try_start_stage1(&self) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.stage != FarmStage::Stopped {
            return Err(FarmError::InvalidState(format!(
                "Web farm cannot start stage 1 when at {}",
                lifecycle.stage
            )));
        }

        if lifecycle.enabled == Some(false) {
            return Ok(false);
        }

        if !self.configuration_enables_farm() {
            lifecycle.enabled = Some(false);
            return Ok(false);
        }
        lifecycle.enabled = Some(true);

        tracing::debug!("Start stage 1");

        let name = resolve_node_name(&self.config.node);
        let registry = &self.state.registry;
        let negotiator =
            PollingIntervalNegotiator::from_settings(registry.clone(), &self.config.settings)?;

        let (mut record, is_new) = match registry.find_by_name(&name).await? {
            Some(record) => (record, false),
            None => {
                let mut record = NodeRecord::new(&name);
                record.id = registry.create(&record).await?;
                tracing::info!(node = %name, id = %record.id, "Registered new web farm node");
                (record, true)
            }
        };

        let configured = record
            .configured_polling_interval
            .or_else(|| self.config.node.configured_polling_interval());
        let interval = negotiator.negotiate(&name, configured).await?;

        if !is_new && !record.stopped_cleanly() {
            self.state
                .add_log(
                    record.id,
                    record.id,
                    FarmEventType::Warning,
                    "Detected previous abrupt shutdown on load.",
                )
                .await?;
        }

        let now = Utc::now();
        record.current_polling_interval = Some(interval);
        record.is_current_job_runner = self.config.node.job_runner;
        record.stopped_at = None;
        record.last_restart_at = Some(now);
        record.last_seen_at = now;
        record.is_active = false;
        registry.update(&record).await?;

        self.state
            .add_log(record.id, record.id, FarmEventType::Startup, "")
            .await?;

        self.state
            .set_local_node(Some(LocalNode {
                id: record.id,
                name: record.name.clone(),
                polling_interval: interval,
                is_job_runner: record.is_current_job_runner,
            }))
            .await;
        lifecycle.stage = FarmStage::Stage1Started;

        tracing::info!(
            node = %record.name,
            interval = %interval,
            job_runner = record.is_current_job_runner,
            "Done with stage 1"
        );
        Ok(true)
    }

    /// Mark this node active and start polling for leadership.
    pub async fn try_start_stage2(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.enabled == Some(false) {
            return Ok(());
        }

        if lifecycle.stage != FarmStage::Stage1Started {
            return Err(FarmError::InvalidState(format!(
                "Web farm cannot start stage 2 when at {}",
                lifecycle.stage
            )));
        }

        let local = self.local_node_or_err().await?;
        tracing::debug!("Start stage 2");

        // Subscribe before going active so no ping sent after that is missed.
        let receiver = self.state.channel.subscribe();

        let mut record = self.find_record(&local.name).await?;
        record.is_active = true;
        record.last_seen_at = Utc::now();
        self.state.registry.update(&record).await?;

        let cancel = CancellationToken::new();
        let handlers = Handlers::new();
        let listener = tokio::spawn(run_inbound(
            self.state.clone(),
            self.router.clone(),
            receiver,
            handlers.clone(),
            cancel.clone(),
        ));
        let poller = tokio::spawn(
            LeadershipPoller::new(self.state.clone(), local.clone()).run(cancel.clone()),
        );

        if let Err(e) = self
            .state
            .publish(&local.name, FarmEventType::Startup, None, "")
            .await
        {
            tracing::warn!(error = %e, "Failed to announce startup");
        }

        lifecycle.running = Some(RunningTasks {
            cancel,
            poller,
            listener,
            handlers,
        });
        lifecycle.stage = FarmStage::Stage2Started;

        tracing::info!(node = %local.name, "Done with stage 2");
        Ok(())
    }

    /// Stop polling, announce the shutdown and record this node as stopped.
    ///
    /// No poll starts and no message handler runs after this returns. An
    /// in-flight poll, sweep included, and in-flight handlers are each allowed
    /// to finish for up to [`SHUTDOWN_DRAIN_TIMEOUT`] before the shutdown is
    /// recorded.
    pub async fn try_shutdown(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.enabled == Some(false) {
            return Ok(());
        }

        if lifecycle.stage != FarmStage::Stage2Started {
            return Err(FarmError::InvalidState(format!(
                "Web farm cannot shutdown properly when at {}",
                lifecycle.stage
            )));
        }

        tracing::debug!("Shutdown");

        if let Some(running) = lifecycle.running.take() {
            running.cancel.cancel();
            drain(running.poller, "leadership poller").await;
            drain(running.listener, "inbound listener").await;
            running.handlers.drain().await;
        }

        let result = match self.state.local_node().await {
            Some(local) => self.record_shutdown(&local).await,
            None => Err(FarmError::Internal("No local node while running".into())),
        };

        self.state.reset_flags();
        self.state.set_local_node(None).await;
        lifecycle.stage = FarmStage::Stopped;

        result
    }

    async fn record_shutdown(&self, local: &LocalNode) -> Result<()> {
        if let Err(e) = self
            .state
            .publish(&local.name, FarmEventType::Shutdown, None, "")
            .await
        {
            tracing::warn!(error = %e, "Failed to announce shutdown");
        }

        let mut record = self.find_record(&local.name).await?;
        record.is_active = false;
        record.stopped_at = Some(Utc::now());
        record.is_current_job_runner = false;
        self.state.registry.update(&record).await?;

        self.state
            .add_log(local.id, local.id, FarmEventType::Shutdown, "")
            .await?;

        tracing::info!(node = %local.name, "Left the web farm");
        Ok(())
    }

    fn configuration_enables_farm(&self) -> bool {
        if !self.config.settings.enabled {
            tracing::info!("Web farm is disabled");
            return false;
        }

        if !self.config.node.has_valid_key() {
            tracing::warn!("Web farm key is missing or invalid, web farm disabled");
            return false;
        }

        if let Err(e) = self.config.settings.validate() {
            tracing::warn!(error = %e, "Invalid web farm settings, web farm disabled");
            return false;
        }

        true
    }

    async fn find_record(&self, name: &str) -> Result<NodeRecord> {
        self.state
            .registry
            .find_by_name(name)
            .await?
            .ok_or_else(|| FarmError::NotFound(format!("Web farm node {}", name)))
    }

    async fn local_node_or_err(&self) -> Result<LocalNode> {
        self.state
            .local_node()
            .await
            .ok_or_else(|| FarmError::Internal("Stage 1 completed without a local node".into()))
    }

    /// Current lifecycle stage.
    pub async fn stage(&self) -> FarmStage {
        self.lifecycle.lock().await.stage
    }

    /// Whether stage 1 found the farm enabled. `false` before stage 1 runs.
    pub async fn is_enabled(&self) -> bool {
        self.lifecycle.lock().await.enabled == Some(true)
    }

    /// Whether this node asserted leadership in its latest poll.
    ///
    /// A hint, not an arbitrated guarantee: two nodes can briefly both hold it.
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// This node's identity, once stage 1 has completed.
    pub async fn local_node(&self) -> Option<LocalNode> {
        self.state.local_node().await
    }

    /// Whether this node was configured to run jobs when it registered.
    pub async fn is_job_runner(&self) -> bool {
        self.state
            .local_node()
            .await
            .map(|n| n.is_job_runner)
            .unwrap_or(false)
    }

    /// Feed one inbound message through the handler table.
    pub async fn handle_message(&self, message: FarmMessage) {
        let event_type = message.event_type;
        if let Err(e) = self.router.dispatch(self.state.clone(), message).await {
            tracing::warn!(event_type = %event_type, error = %e, "Farm message handler failed");
        }
    }

    #[cfg(test)]
    pub(crate) async fn poll_once(&self) -> Result<PollOutcome> {
        let local = self.local_node_or_err().await?;
        LeadershipPoller::new(self.state.clone(), local)
            .poll()
            .await
    }
}

async fn run_inbound(
    state: Arc<FarmState>,
    router: Arc<MessageRouter>,
    mut receiver: broadcast::Receiver<FarmMessage>,
    handlers: Handlers,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                // Handlers run concurrently with each other and with the poll loop.
                Ok(message) => handlers.spawn(state.clone(), router.clone(), message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Inbound farm messages lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Farm message channel closed");
                    break;
                }
            },
        }
    }
}

async fn drain(handle: JoinHandle<()>, task: &str) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(task, error = %e, "Farm task ended abnormally"),
        Err(_) => {
            tracing::warn!(task, "Farm task did not stop in time, aborting");
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use webfarm_core::cluster::{NodeId, PollingInterval};
    use webfarm_core::testing::{LocalBus, MemoryEventLog, MemoryNodeRegistry};

    use crate::cluster::poller::PONG_TIMEOUT;

    struct Harness {
        registry: Arc<MemoryNodeRegistry>,
        log: Arc<MemoryEventLog>,
        bus: LocalBus,
        coordinator: LeadershipCoordinator,
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            settings: FarmSettings {
                enabled: true,
                leadership_polling_interval_lower_limit_secs: 5,
                leadership_polling_interval_upper_limit_secs: 10,
            },
            node: NodeConfig {
                name: Some("web-01".to_string()),
                key: Some("0b6c2f6e-farm-key".to_string()),
                job_runner: true,
                polling_interval_secs: None,
            },
        }
    }

    fn harness_with(config: CoordinatorConfig) -> Harness {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let log = Arc::new(MemoryEventLog::new());
        let bus = LocalBus::new();
        let coordinator = LeadershipCoordinator::new(
            registry.clone(),
            log.clone(),
            Arc::new(bus.clone()),
            config,
        );

        Harness {
            registry,
            log,
            bus,
            coordinator,
        }
    }

    fn harness() -> Harness {
        harness_with(config())
    }

    fn fixed_interval_config(secs: f64) -> CoordinatorConfig {
        let mut config = config();
        config.node.polling_interval_secs = Some(secs);
        config
    }

    #[tokio::test]
    async fn test_stage1_registers_new_node() {
        let h = harness();

        assert!(h.coordinator.try_start_stage1().await.unwrap());
        assert_eq!(h.coordinator.stage().await, FarmStage::Stage1Started);
        assert!(h.coordinator.is_enabled().await);
        assert!(h.coordinator.is_job_runner().await);

        let record = h.registry.get("web-01").unwrap();
        assert!(!record.is_active);
        assert!(record.is_current_job_runner);
        assert!(record.stopped_at.is_none());
        assert!(record.last_restart_at.is_some());

        let interval = record.current_polling_interval.unwrap();
        assert!((50..=100).contains(&interval.deciseconds()));
        assert_eq!(h.coordinator.local_node().await.unwrap().polling_interval, interval);

        h.log.assert_logged(FarmEventType::Startup, record.id);
        h.log.assert_not_logged(FarmEventType::Warning, record.id);
        assert!(h.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_stage1_reuses_record_and_detects_crash() {
        let h = harness();
        let mut existing = NodeRecord::new("web-01");
        existing.stopped_at = None;
        let id = h.registry.insert(existing);

        assert!(h.coordinator.try_start_stage1().await.unwrap());

        assert_eq!(h.registry.nodes().len(), 1);
        assert_eq!(h.coordinator.local_node().await.unwrap().id, id);
        h.log.assert_logged_with(
            FarmEventType::Warning,
            id,
            "Detected previous abrupt shutdown on load.",
        );
    }

    #[tokio::test]
    async fn test_clean_previous_stop_is_not_a_warning() {
        let h = harness();
        let mut existing = NodeRecord::new("web-01");
        existing.stopped_at = Some(Utc::now() - chrono::Duration::hours(1));
        let id = h.registry.insert(existing);

        assert!(h.coordinator.try_start_stage1().await.unwrap());

        h.log.assert_not_logged(FarmEventType::Warning, id);
        assert!(h.registry.get("web-01").unwrap().stopped_at.is_none());
    }

    #[tokio::test]
    async fn test_configured_interval_used_verbatim() {
        let h = harness_with(fixed_interval_config(42.5));
        h.registry.reserve_interval(PollingInterval::from_deciseconds(425));

        assert!(h.coordinator.try_start_stage1().await.unwrap());
        let record = h.registry.get("web-01").unwrap();
        assert_eq!(
            record.current_polling_interval,
            Some(PollingInterval::from_deciseconds(425))
        );
    }

    #[tokio::test]
    async fn test_record_override_beats_file_override() {
        let h = harness_with(fixed_interval_config(42.5));
        let mut existing = NodeRecord::new("web-01");
        existing.configured_polling_interval = Some(PollingInterval::from_secs(8));
        existing.stopped_at = Some(Utc::now());
        h.registry.insert(existing);

        assert!(h.coordinator.try_start_stage1().await.unwrap());
        let record = h.registry.get("web-01").unwrap();
        assert_eq!(record.current_polling_interval, Some(PollingInterval::from_secs(8)));
    }

    #[tokio::test]
    async fn test_disabled_farm_is_a_no_op() {
        let mut config = config();
        config.settings.enabled = false;
        let h = harness_with(config);

        assert!(!h.coordinator.try_start_stage1().await.unwrap());
        assert_eq!(h.coordinator.stage().await, FarmStage::Stopped);
        assert!(!h.coordinator.is_enabled().await);

        h.coordinator.try_start_stage2().await.unwrap();
        h.coordinator.try_shutdown().await.unwrap();

        assert_eq!(h.coordinator.stage().await, FarmStage::Stopped);
        assert_eq!(h.registry.write_count(), 0);
        assert!(h.log.entries().is_empty());
        assert!(h.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_malformed_key_disables_farm() {
        for key in [None, Some("   "), Some("has spaces in it")] {
            let mut config = config();
            config.node.key = key.map(str::to_string);
            let h = harness_with(config);

            assert!(!h.coordinator.start_stage1().await);
            assert_eq!(h.registry.write_count(), 0);
            assert!(h.registry.nodes().is_empty());
        }
    }

    #[tokio::test]
    async fn test_invalid_bounds_disable_farm() {
        let mut config = config();
        config.settings.leadership_polling_interval_lower_limit_secs = 10;
        config.settings.leadership_polling_interval_upper_limit_secs = 10;
        let h = harness_with(config);

        assert!(!h.coordinator.start_stage1().await);
        assert!(!h.coordinator.is_enabled().await);
        assert!(h.registry.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_decision_sticks() {
        let mut config = config();
        config.node.key = None;
        let h = harness_with(config);

        assert!(!h.coordinator.start_stage1().await);
        assert!(!h.coordinator.start_stage1().await);
        assert_eq!(h.coordinator.stage().await, FarmStage::Stopped);
    }

    #[tokio::test]
    async fn test_negotiation_exhaustion_aborts_stage1() {
        let h = harness();
        let mut existing = NodeRecord::new("web-01");
        existing.is_active = true;
        existing.stopped_at = Some(Utc::now());
        h.registry.insert(existing);
        h.registry.reserve_all_intervals();

        let err = h.coordinator.try_start_stage1().await.unwrap_err();
        assert!(matches!(err, FarmError::Negotiation { attempts: 50, .. }));
        assert_eq!(h.coordinator.stage().await, FarmStage::Stopped);
        assert!(h.coordinator.local_node().await.is_none());

        let record = h.registry.get("web-01").unwrap();
        assert!(record.is_active);
        assert_eq!(record.current_polling_interval, None);
        assert_eq!(h.registry.write_count(), 0);
        h.log.assert_not_logged(FarmEventType::Startup, record.id);

        let err = h.coordinator.try_start_stage2().await.unwrap_err();
        assert!(matches!(err, FarmError::InvalidState(_)));
        assert_eq!(h.registry.write_count(), 0);
    }

    #[tokio::test]
    async fn test_stage2_before_stage1_writes_nothing() {
        let h = harness();

        let err = h.coordinator.try_start_stage2().await.unwrap_err();
        assert!(matches!(err, FarmError::InvalidState(_)));

        h.coordinator.start_stage2().await;
        assert_eq!(h.coordinator.stage().await, FarmStage::Stopped);
        assert_eq!(h.registry.write_count(), 0);
        assert!(h.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_transitions_are_rejected() {
        let h = harness();

        assert!(matches!(
            h.coordinator.try_shutdown().await,
            Err(FarmError::InvalidState(_))
        ));

        assert!(h.coordinator.try_start_stage1().await.unwrap());
        assert!(matches!(
            h.coordinator.try_start_stage1().await,
            Err(FarmError::InvalidState(_))
        ));
        assert!(matches!(
            h.coordinator.try_shutdown().await,
            Err(FarmError::InvalidState(_))
        ));
        assert_eq!(h.coordinator.stage().await, FarmStage::Stage1Started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage2_activates_and_announces() {
        let h = harness_with(fixed_interval_config(5.0));
        assert!(h.coordinator.start_stage1().await);
        h.coordinator.start_stage2().await;

        assert_eq!(h.coordinator.stage().await, FarmStage::Stage2Started);
        h.registry.assert_node_active("web-01");
        h.bus.assert_published("web-01", FarmEventType::Startup);

        h.coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_makes_next_poll_concede() {
        let h = harness_with(fixed_interval_config(5.0));
        assert!(h.coordinator.start_stage1().await);

        h.coordinator
            .handle_message(FarmMessage::broadcast("web-02", FarmEventType::Ping, ""))
            .await;
        h.bus.assert_published("web-01", FarmEventType::Pong);

        assert_eq!(h.coordinator.poll_once().await.unwrap(), PollOutcome::Conceded);
        h.bus.assert_not_published("web-01", FarmEventType::Ping);
        assert!(!h.coordinator.is_leader());

        let outcome = h.coordinator.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Led { .. }));
        h.bus.assert_published("web-01", FarmEventType::Ping);

        assert!(h.coordinator.is_leader());
        h.registry.assert_sole_leader("web-01");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ping_marks_peers_inactive() {
        let h = harness_with(fixed_interval_config(5.0));
        for name in ["web-02", "web-03"] {
            let mut peer = NodeRecord::new(name);
            peer.is_active = true;
            peer.last_seen_at = Utc::now() - chrono::Duration::seconds(90);
            h.registry.insert(peer);
        }
        assert!(h.coordinator.start_stage1().await);

        h.coordinator.poll_once().await.unwrap();

        h.registry.assert_node_inactive("web-02");
        h.registry.assert_node_inactive("web-03");
        for name in ["web-02", "web-03"] {
            let id = h.registry.get(name).unwrap().id;
            assert_eq!(h.log.count_for(FarmEventType::Warning, id), 1);
        }
    }

    #[tokio::test]
    async fn test_duplicate_pong_is_idempotent() {
        let h = harness();
        let peer_id = h.registry.insert(NodeRecord::new("web-02"));
        assert!(h.coordinator.start_stage1().await);

        let pong = FarmMessage::unicast("web-02", "web-01", FarmEventType::Pong, "");
        h.coordinator.handle_message(pong.clone()).await;
        let after_first = h.registry.get("web-02").unwrap();
        h.coordinator.handle_message(pong).await;
        let after_second = h.registry.get("web-02").unwrap();

        assert!(after_first.is_active);
        assert_eq!(after_first.is_active, after_second.is_active);
        assert_eq!(h.log.count_for(FarmEventType::Warning, peer_id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_records_stop_and_halts_polling() {
        let h = harness_with(fixed_interval_config(5.0));
        assert!(h.coordinator.start_stage1().await);
        h.coordinator.start_stage2().await;

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(h.bus.count("web-01", FarmEventType::Ping), 1);
        tokio::time::sleep(PONG_TIMEOUT).await;

        h.coordinator.try_shutdown().await.unwrap();
        assert_eq!(h.coordinator.stage().await, FarmStage::Stopped);
        assert!(!h.coordinator.is_leader());
        assert!(h.coordinator.local_node().await.is_none());

        let record = h.registry.get("web-01").unwrap();
        assert!(!record.is_active);
        assert!(!record.is_current_job_runner);
        assert!(record.stopped_at.is_some());
        h.log.assert_logged(FarmEventType::Shutdown, record.id);
        h.bus.assert_published("web-01", FarmEventType::Shutdown);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.bus.count("web-01", FarmEventType::Ping), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_in_flight_sweep_finish() {
        let h = harness_with(fixed_interval_config(5.0));
        let mut peer = NodeRecord::new("web-02");
        peer.is_active = true;
        peer.last_seen_at = Utc::now() - chrono::Duration::seconds(90);
        let peer_id = h.registry.insert(peer);

        assert!(h.coordinator.start_stage1().await);
        h.coordinator.start_stage2().await;

        // Inside the pong wait of the first poll.
        tokio::time::sleep(Duration::from_millis(5300)).await;
        h.coordinator.try_shutdown().await.unwrap();

        h.registry.assert_node_inactive("web-02");
        h.log.assert_logged_with(
            FarmEventType::Warning,
            peer_id,
            "web-02 was marked active but did not respond to a ping",
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.bus.count("web-01", FarmEventType::Ping), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_pongs_reinstate_once() {
        let h = harness();
        let peer_id = h.registry.insert(NodeRecord::new("web-02"));
        assert!(h.coordinator.start_stage1().await);

        let pong = FarmMessage::unicast("web-02", "web-01", FarmEventType::Pong, "");
        tokio::join!(
            h.coordinator.handle_message(pong.clone()),
            h.coordinator.handle_message(pong),
        );

        h.registry.assert_node_active("web-02");
        assert_eq!(h.log.count_for(FarmEventType::Warning, peer_id), 1);
    }

    /// Registry whose lookups of one node take `delay`.
    struct SlowLookups {
        inner: Arc<MemoryNodeRegistry>,
        slow_name: &'static str,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl NodeRegistry for SlowLookups {
        async fn find_by_name(&self, name: &str) -> Result<Option<NodeRecord>> {
            if name == self.slow_name {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.find_by_name(name).await
        }

        async fn create(&self, record: &NodeRecord) -> Result<NodeId> {
            self.inner.create(record).await
        }

        async fn update(&self, record: &NodeRecord) -> Result<()> {
            self.inner.update(record).await
        }

        async fn list_all(&self) -> Result<Vec<NodeRecord>> {
            self.inner.list_all().await
        }

        async fn exists_with_interval(
            &self,
            exclude_name: &str,
            interval: PollingInterval,
        ) -> Result<bool> {
            self.inner.exists_with_interval(exclude_name, interval).await
        }

        async fn assert_leader(&self, leader_name: &str, seen_at: DateTime<Utc>) -> Result<()> {
            self.inner.assert_leader(leader_name, seen_at).await
        }
    }

    fn slow_pong_harness(delay: Duration) -> Harness {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let log = Arc::new(MemoryEventLog::new());
        let bus = LocalBus::new();
        let coordinator = LeadershipCoordinator::new(
            Arc::new(SlowLookups {
                inner: registry.clone(),
                slow_name: "web-02",
                delay,
            }),
            log.clone(),
            Arc::new(bus.clone()),
            fixed_interval_config(5.0),
        );

        Harness {
            registry,
            log,
            bus,
            coordinator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_handlers() {
        let h = slow_pong_harness(Duration::from_secs(2));
        let peer_id = h.registry.insert(NodeRecord::new("web-02"));
        assert!(h.coordinator.start_stage1().await);
        h.coordinator.start_stage2().await;

        h.bus
            .publish(FarmMessage::unicast("web-02", "web-01", FarmEventType::Pong, ""))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.coordinator.try_shutdown().await.unwrap();

        // The pong finished before the shutdown was recorded.
        h.registry.assert_node_active("web-02");
        assert_eq!(h.log.count_for(FarmEventType::Warning, peer_id), 1);
        let writes = h.registry.write_count();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.registry.write_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_stuck_handlers() {
        let h = slow_pong_harness(Duration::from_secs(60));
        let peer_id = h.registry.insert(NodeRecord::new("web-02"));
        assert!(h.coordinator.start_stage1().await);
        h.coordinator.start_stage2().await;

        h.bus
            .publish(FarmMessage::unicast("web-02", "web-01", FarmEventType::Pong, ""))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.coordinator.try_shutdown().await.unwrap();
        let writes = h.registry.write_count();

        tokio::time::sleep(Duration::from_secs(120)).await;
        h.registry.assert_node_inactive("web-02");
        h.log.assert_not_logged(FarmEventType::Warning, peer_id);
        assert_eq!(h.registry.write_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_shutdown() {
        let h = harness_with(fixed_interval_config(5.0));
        assert!(h.coordinator.start_stage1().await);
        h.coordinator.start_stage2().await;
        h.coordinator.shutdown().await;

        assert!(h.coordinator.start_stage1().await);
        let id = h.coordinator.local_node().await.unwrap().id;
        h.log.assert_not_logged(FarmEventType::Warning, id);
        assert_eq!(h.log.count_for(FarmEventType::Startup, id), 2);
    }
}
