use serde::{Deserialize, Serialize};

use crate::cluster::PollingInterval;

/// Settings that apply to this node only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name override. Defaults to the machine hostname.
    pub name: Option<String>,

    /// Web farm activation key.
    pub key: Option<String>,

    /// Whether this node is configured to run scheduled jobs.
    #[serde(default)]
    pub job_runner: bool,

    /// Fixed polling interval in seconds, used verbatim instead of a generated one.
    pub polling_interval_secs: Option<f64>,
}

impl NodeConfig {
    /// Check that an activation key is present and looks like a key.
    ///
    /// A plausible key is non-blank and made of printable, non-whitespace ASCII.
    pub fn has_valid_key(&self) -> bool {
        match self.key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.chars().all(|c| c.is_ascii_graphic()),
            _ => false,
        }
    }

    /// The operator-supplied polling interval, if one is set and positive.
    pub fn configured_polling_interval(&self) -> Option<PollingInterval> {
        self.polling_interval_secs
            .and_then(PollingInterval::from_secs_f64)
    }

    /// The configured node name, ignoring blank values.
    pub fn name_override(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
