//! Several coordinators sharing one in-memory registry, event log and bus.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use webfarm_core::cluster::{FarmEventType, FarmMessage, MessageChannel, NodeRecord};
use webfarm_core::config::{FarmSettings, NodeConfig};
use webfarm_core::testing::{LocalBus, MemoryEventLog, MemoryNodeRegistry};
use webfarm_runtime::cluster::{
    CoordinatorConfig, FarmStage, LeadershipCoordinator, PollingIntervalNegotiator,
};

struct Farm {
    registry: Arc<MemoryNodeRegistry>,
    log: Arc<MemoryEventLog>,
    bus: LocalBus,
}

impl Farm {
    fn new() -> Self {
        Self {
            registry: Arc::new(MemoryNodeRegistry::new()),
            log: Arc::new(MemoryEventLog::new()),
            bus: LocalBus::new(),
        }
    }

    fn node(&self, name: &str, interval_secs: Option<f64>) -> LeadershipCoordinator {
        LeadershipCoordinator::new(
            self.registry.clone(),
            self.log.clone(),
            Arc::new(self.bus.clone()),
            CoordinatorConfig {
                settings: FarmSettings {
                    enabled: true,
                    leadership_polling_interval_lower_limit_secs: 50,
                    leadership_polling_interval_upper_limit_secs: 70,
                },
                node: NodeConfig {
                    name: Some(name.to_string()),
                    key: Some("farm-key-1".to_string()),
                    job_runner: false,
                    polling_interval_secs: interval_secs,
                },
            },
        )
    }

    async fn start(&self, name: &str, interval_secs: f64) -> LeadershipCoordinator {
        let node = self.node(name, Some(interval_secs));
        assert!(node.start_stage1().await);
        node.start_stage2().await;
        assert_eq!(node.stage().await, FarmStage::Stage2Started);
        node
    }

    fn id(&self, name: &str) -> webfarm_core::cluster::NodeId {
        self.registry.get(name).unwrap().id
    }
}

async fn advance_to(start: tokio::time::Instant, millis: u64) {
    tokio::time::sleep_until(start + Duration::from_millis(millis)).await;
}

#[tokio::test(start_paused = true)]
async fn two_nodes_settle_on_the_faster_leader() {
    let farm = Farm::new();
    let start = tokio::time::Instant::now();
    let a = farm.start("node-a", 5.0).await;
    let b = farm.start("node-b", 6.0).await;

    // A's first tick pings, B answers.
    advance_to(start, 5_500).await;
    assert_eq!(farm.bus.count("node-a", FarmEventType::Ping), 1);
    farm.bus.assert_published("node-b", FarmEventType::Pong);
    assert!(a.is_leader());
    farm.registry.assert_sole_leader("node-a");

    // A's sweep finds B fresh; B's tick concedes.
    advance_to(start, 6_500).await;
    farm.registry.assert_node_active("node-b");
    assert!(farm.log.entries_of_type(FarmEventType::Warning).is_empty());
    assert_eq!(farm.bus.count("node-b", FarmEventType::Ping), 0);
    assert!(!b.is_leader());

    // Every later round goes the same way.
    advance_to(start, 20_500).await;
    assert_eq!(farm.bus.count("node-a", FarmEventType::Ping), 4);
    assert_eq!(farm.bus.count("node-b", FarmEventType::Ping), 0);
    assert!(a.is_leader());
    farm.registry.assert_node_active("node-a");
    farm.registry.assert_node_active("node-b");

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_node_is_swept_and_reinstated_by_a_late_pong() {
    let farm = Farm::new();
    let mut ghost = NodeRecord::new("node-c");
    ghost.is_active = true;
    ghost.last_seen_at = Utc::now() - chrono::Duration::minutes(5);
    ghost.stopped_at = None;
    farm.registry.insert(ghost);

    let start = tokio::time::Instant::now();
    let a = farm.start("node-a", 5.0).await;

    advance_to(start, 6_500).await;
    farm.registry.assert_node_inactive("node-c");
    let c = farm.id("node-c");
    farm.log.assert_logged_with(
        FarmEventType::Warning,
        c,
        "node-c was marked active but did not respond to a ping",
    );

    // The next sweep leaves an already-inactive node alone.
    advance_to(start, 11_500).await;
    assert_eq!(farm.log.count_for(FarmEventType::Warning, c), 1);

    farm.bus
        .publish(FarmMessage::unicast("node-c", "node-a", FarmEventType::Pong, ""))
        .await
        .unwrap();
    advance_to(start, 11_600).await;

    farm.registry.assert_node_active("node-c");
    farm.log.assert_logged_with(
        FarmEventType::Warning,
        c,
        "node-c was marked inactive but responded to a ping",
    );
    assert_eq!(farm.log.count_for(FarmEventType::Warning, c), 2);

    a.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn graceful_restart_reuses_record_without_crash_warning() {
    let farm = Farm::new();
    let start = tokio::time::Instant::now();
    let a = farm.start("node-a", 5.0).await;
    let b = farm.start("node-b", 6.0).await;
    let b_id = farm.id("node-b");

    advance_to(start, 7_000).await;
    b.shutdown().await;
    farm.bus.assert_published("node-b", FarmEventType::Shutdown);
    farm.log.assert_logged(FarmEventType::Shutdown, b_id);

    let record = farm.registry.get("node-b").unwrap();
    assert!(!record.is_active);
    assert!(record.stopped_at.is_some());

    // A no longer hears from B, but B is already inactive so nothing is swept.
    advance_to(start, 16_500).await;
    assert!(farm.log.entries_of_type(FarmEventType::Warning).is_empty());

    let b = farm.start("node-b", 6.0).await;
    assert_eq!(farm.id("node-b"), b_id);
    assert_eq!(farm.registry.nodes().len(), 2);
    farm.log.assert_not_logged(FarmEventType::Warning, b_id);
    assert_eq!(farm.log.count_for(FarmEventType::Startup, b_id), 2);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn crashed_node_is_flagged_on_next_start() {
    let farm = Farm::new();
    let a = farm.node("node-a", Some(5.0));
    assert!(a.start_stage1().await);
    a.start_stage2().await;
    // Process dies without shutdown; a new process takes the same name.
    drop(a);

    let again = farm.node("node-a", Some(5.0));
    assert!(again.start_stage1().await);

    let id = farm.id("node-a");
    farm.log.assert_logged_with(
        FarmEventType::Warning,
        id,
        "Detected previous abrupt shutdown on load.",
    );
}

#[tokio::test]
async fn nodes_negotiate_distinct_intervals() {
    let farm = Farm::new();
    let mut nodes = Vec::new();

    for i in 0..10 {
        let node = farm.node(&format!("node-{}", i), None);
        assert!(node.start_stage1().await);
        nodes.push(node);
    }

    let mut intervals: Vec<_> = farm
        .registry
        .nodes()
        .into_iter()
        .map(|n| n.current_polling_interval.unwrap())
        .collect();
    assert!(intervals
        .iter()
        .all(|i| (500..=700).contains(&i.deciseconds())));

    intervals.sort();
    intervals.dedup();
    assert_eq!(intervals.len(), 10);
}

#[tokio::test]
async fn negotiator_is_usable_on_its_own() {
    let registry = Arc::new(MemoryNodeRegistry::new());
    let negotiator = PollingIntervalNegotiator::new(registry, 50, 70).unwrap();

    let interval = negotiator.negotiate("node-a", None).await.unwrap();
    assert!((500..=700).contains(&interval.deciseconds()));
}
