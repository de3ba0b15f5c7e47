use serde::{Deserialize, Serialize};

use crate::error::{FarmError, Result};

/// Default lower bound for generated leadership polling intervals.
pub const DEFAULT_POLLING_LOWER_LIMIT_SECS: u32 = 50;

/// Default upper bound for generated leadership polling intervals.
pub const DEFAULT_POLLING_UPPER_LIMIT_SECS: u32 = 70;

/// Farm-wide settings shared by every node.
///
/// When the shared `webfarm_settings` row exists it wins over the values read
/// from the local configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmSettings {
    /// Whether web farm coordination is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Lower bound, in whole seconds, for generated polling intervals.
    #[serde(default = "default_lower_limit")]
    pub leadership_polling_interval_lower_limit_secs: u32,

    /// Upper bound, in whole seconds, for generated polling intervals.
    #[serde(default = "default_upper_limit")]
    pub leadership_polling_interval_upper_limit_secs: u32,
}

impl Default for FarmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            leadership_polling_interval_lower_limit_secs: default_lower_limit(),
            leadership_polling_interval_upper_limit_secs: default_upper_limit(),
        }
    }
}

impl FarmSettings {
    /// Check the polling bounds, reporting every violated rule.
    pub fn validate(&self) -> Result<()> {
        let lower = self.leadership_polling_interval_lower_limit_secs;
        let upper = self.leadership_polling_interval_upper_limit_secs;
        let mut problems = Vec::new();

        if lower < 1 {
            problems.push("leadership_polling_interval_lower_limit_secs cannot be less than 1");
        }

        if upper < 1 {
            problems.push("leadership_polling_interval_upper_limit_secs cannot be less than 1");
        }

        if upper <= lower {
            problems.push(
                "leadership_polling_interval_upper_limit_secs must be greater than \
                 leadership_polling_interval_lower_limit_secs",
            );
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(FarmError::Validation(problems.join("; ")))
        }
    }
}

fn default_lower_limit() -> u32 {
    DEFAULT_POLLING_LOWER_LIMIT_SECS
}

fn default_upper_limit() -> u32 {
    DEFAULT_POLLING_UPPER_LIMIT_SECS
}
