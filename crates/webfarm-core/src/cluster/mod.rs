mod event;
mod interval;
mod node;
mod traits;

pub use event::{FarmEventType, FarmMessage, NodeLogEntry};
pub use interval::{PollingInterval, DECISECONDS_PER_SECOND};
pub use node::{FarmSummary, NodeId, NodeRecord};
pub use traits::{EventLog, MessageChannel, NodeRegistry};
