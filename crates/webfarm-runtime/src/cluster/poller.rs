use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use webfarm_core::cluster::FarmEventType;
use webfarm_core::Result;

use super::state::{FarmState, LocalNode};

/// How long a leader waits for Pong replies before sweeping for unresponsive nodes.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of one leadership poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another node pinged this one since the last poll, so it deferred.
    Conceded,
    /// This node asserted leadership and swept the named unresponsive nodes.
    Led { unresponsive: Vec<String> },
}

/// Drives this node's leadership poll on its negotiated cadence.
pub(crate) struct LeadershipPoller {
    state: Arc<FarmState>,
    node: LocalNode,
}

impl LeadershipPoller {
    pub(crate) fn new(state: Arc<FarmState>, node: LocalNode) -> Self {
        Self { state, node }
    }

    /// Run the poll loop until cancelled.
    ///
    /// Polls run inline, so a slow poll delays the next one instead of overlapping it.
    /// Cancellation stops new ticks; a poll already running finishes its sweep.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let period = self.node.polling_interval.as_duration();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            node = %self.node.name,
            interval = %self.node.polling_interval,
            "Leadership polling started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(node = %self.node.name, "Leadership polling shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll().await {
                        tracing::warn!(node = %self.node.name, error = %e, "Leadership poll failed");
                    }
                }
            }
        }
    }

    /// Run one leadership poll.
    pub(crate) async fn poll(&self) -> Result<PollOutcome> {
        // A ping from another node means that node is leading this round.
        if self.state.take_was_pinged() {
            tracing::debug!("My time to poll. I was pinged, so I'm not the leader");
            self.state.set_leader(false);
            return Ok(PollOutcome::Conceded);
        }

        tracing::debug!("My time to poll. I was not pinged, so I'm starting leadership duties");

        let polling_time = Utc::now();
        if let Err(e) = self
            .state
            .publish(&self.node.name, FarmEventType::Ping, None, "")
            .await
        {
            tracing::warn!(error = %e, "Failed to broadcast ping");
        }

        self.state
            .registry
            .assert_leader(&self.node.name, polling_time)
            .await?;
        self.state.set_leader(true);

        tokio::time::sleep(PONG_TIMEOUT).await;

        let unresponsive = self.sweep_unresponsive(polling_time).await?;
        Ok(PollOutcome::Led { unresponsive })
    }

    /// Mark active nodes that have not been seen since `polling_time` as inactive.
    async fn sweep_unresponsive(&self, polling_time: DateTime<Utc>) -> Result<Vec<String>> {
        tracing::debug!("Checking for unresponsive nodes");
        let _guard = self.state.liveness.lock().await;

        let unresponsive: Vec<_> = self
            .state
            .registry
            .list_all()
            .await?
            .into_iter()
            .filter(|n| {
                n.last_seen_at < polling_time && n.is_active && n.name != self.node.name
            })
            .collect();

        tracing::debug!("I found {} unresponsive nodes", unresponsive.len());

        let mut names = Vec::with_capacity(unresponsive.len());
        for mut node in unresponsive {
            self.state
                .add_log(
                    self.node.id,
                    node.id,
                    FarmEventType::Warning,
                    &format!("{} was marked active but did not respond to a ping", node.name),
                )
                .await?;

            node.is_active = false;
            self.state.registry.update(&node).await?;

            tracing::warn!(node = %node.name, "Node did not respond to a ping, marked inactive");
            names.push(node.name);
        }

        Ok(names)
    }
}
