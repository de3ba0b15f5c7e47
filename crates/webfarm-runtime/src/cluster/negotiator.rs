use std::sync::Arc;

use rand::Rng;

use webfarm_core::cluster::{NodeRegistry, PollingInterval, DECISECONDS_PER_SECOND};
use webfarm_core::config::FarmSettings;
use webfarm_core::{FarmError, Result};

/// Number of random intervals tried before a node gives up on joining the farm.
pub const MAX_GENERATION_ATTEMPTS: u32 = 50;

/// Chooses a polling interval no other registered node is using.
///
/// Staggering the nodes' poll ticks keeps two of them from deciding to lead
/// in the same instant.
pub struct PollingIntervalNegotiator {
    registry: Arc<dyn NodeRegistry>,
    lower_secs: u32,
    upper_secs: u32,
}

impl PollingIntervalNegotiator {
    /// Create a negotiator for the given bounds. Requires `upper > lower >= 1`.
    pub fn new(registry: Arc<dyn NodeRegistry>, lower_secs: u32, upper_secs: u32) -> Result<Self> {
        if lower_secs < 1 || upper_secs <= lower_secs {
            return Err(FarmError::Validation(format!(
                "Polling interval bounds must satisfy upper > lower >= 1 (lower = {}, upper = {})",
                lower_secs, upper_secs
            )));
        }

        Ok(Self {
            registry,
            lower_secs,
            upper_secs,
        })
    }

    /// Create a negotiator from the farm-wide settings.
    pub fn from_settings(registry: Arc<dyn NodeRegistry>, settings: &FarmSettings) -> Result<Self> {
        Self::new(
            registry,
            settings.leadership_polling_interval_lower_limit_secs,
            settings.leadership_polling_interval_upper_limit_secs,
        )
    }

    /// Pick a uniformly random interval within the bounds, at decisecond resolution.
    pub fn generate(&self) -> PollingInterval {
        let min_ds = self.lower_secs.saturating_mul(DECISECONDS_PER_SECOND);
        let max_ds = self.upper_secs.saturating_mul(DECISECONDS_PER_SECOND);
        PollingInterval::from_deciseconds(rand::thread_rng().gen_range(min_ds..=max_ds))
    }

    /// Decide the polling interval for `node_name`.
    ///
    /// A configured interval is returned as is. Otherwise random intervals are
    /// drawn until one is not held by any other node, giving up after
    /// [`MAX_GENERATION_ATTEMPTS`] draws.
    pub async fn negotiate(
        &self,
        node_name: &str,
        configured: Option<PollingInterval>,
    ) -> Result<PollingInterval> {
        if let Some(interval) = configured {
            tracing::debug!(node = %node_name, interval = %interval, "Using configured polling interval");
            return Ok(interval);
        }

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let candidate = self.generate();
            tracing::debug!(attempt, "Checking poll interval {}", candidate);

            if !self
                .registry
                .exists_with_interval(node_name, candidate)
                .await?
            {
                return Ok(candidate);
            }
        }

        Err(FarmError::Negotiation {
            node: node_name.to_string(),
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }
}
