mod coordinator;
mod handlers;
mod negotiator;
mod poller;
mod state;

pub use coordinator::{
    CoordinatorConfig, FarmStage, LeadershipCoordinator, SHUTDOWN_DRAIN_TIMEOUT,
};
pub use negotiator::{PollingIntervalNegotiator, MAX_GENERATION_ATTEMPTS};
pub use poller::{PollOutcome, PONG_TIMEOUT};
pub use state::{resolve_node_name, LocalNode};
