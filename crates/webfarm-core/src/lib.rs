pub mod cluster;
pub mod config;
pub mod error;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cluster::{
    EventLog, FarmEventType, FarmMessage, FarmSummary, MessageChannel, NodeId, NodeLogEntry,
    NodeRecord, NodeRegistry, PollingInterval,
};
pub use config::FarmConfig;
pub use error::{FarmError, Result};
