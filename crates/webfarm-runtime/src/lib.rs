//! Web farm runtime: leadership coordination and its PostgreSQL collaborators.

pub mod bus;
pub mod cluster;
pub mod db;
pub mod migrations;
pub mod store;

pub use bus::{ChannelConfig, PgMessageChannel};
pub use cluster::{
    CoordinatorConfig, FarmStage, LeadershipCoordinator, LocalNode,
    PollingIntervalNegotiator,
};
pub use db::Database;
pub use migrations::MigrationRunner;
pub use store::{load_farm_settings, save_farm_settings, PgEventLog, PgNodeRegistry};
