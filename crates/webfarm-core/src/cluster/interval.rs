use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deciseconds per second. Intervals are chosen and compared at this resolution.
pub const DECISECONDS_PER_SECOND: u32 = 10;

/// A leadership polling interval with one decimal-second resolution.
///
/// Stored as whole deciseconds so two nodes holding the "same" interval compare
/// exactly equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollingInterval(u32);

impl PollingInterval {
    /// Create from a number of deciseconds.
    pub const fn from_deciseconds(deciseconds: u32) -> Self {
        Self(deciseconds)
    }

    /// Create from whole seconds.
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs * DECISECONDS_PER_SECOND)
    }

    /// Create from fractional seconds, rounded to the nearest decisecond.
    ///
    /// Returns `None` for values that are not finite or do not round to a
    /// positive interval.
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() {
            return None;
        }

        let deciseconds = (secs * f64::from(DECISECONDS_PER_SECOND)).round();
        if deciseconds < 1.0 || deciseconds > f64::from(u32::MAX) {
            return None;
        }

        Some(Self(deciseconds as u32))
    }

    /// Get the interval in deciseconds.
    pub fn deciseconds(&self) -> u32 {
        self.0
    }

    /// Get the interval in fractional seconds.
    pub fn as_secs_f64(&self) -> f64 {
        f64::from(self.0) / f64::from(DECISECONDS_PER_SECOND)
    }

    /// Get the interval as a timer period.
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.0) * 100)
    }
}

impl std::fmt::Display for PollingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}",
            self.0 / DECISECONDS_PER_SECOND,
            self.0 % DECISECONDS_PER_SECOND
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_conversions() {
        let interval = PollingInterval::from_deciseconds(53);
        assert_eq!(interval.deciseconds(), 53);
        assert!((interval.as_secs_f64() - 5.3).abs() < f64::EPSILON);
        assert_eq!(interval.as_duration(), Duration::from_millis(5300));
        assert_eq!(PollingInterval::from_secs(6).deciseconds(), 60);
    }

    #[test]
    fn test_display_has_one_decimal() {
        assert_eq!(PollingInterval::from_secs(5).to_string(), "5.0");
        assert_eq!(PollingInterval::from_deciseconds(657).to_string(), "65.7");
    }

    #[test]
    fn test_from_secs_f64_rounds_and_rejects() {
        assert_eq!(
            PollingInterval::from_secs_f64(6.04),
            Some(PollingInterval::from_deciseconds(60))
        );
        assert_eq!(PollingInterval::from_secs_f64(0.0), None);
        assert_eq!(PollingInterval::from_secs_f64(0.04), None);
        assert_eq!(PollingInterval::from_secs_f64(f64::NAN), None);
        assert_eq!(PollingInterval::from_secs_f64(-3.0), None);
    }
}
