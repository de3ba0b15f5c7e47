//! PostgreSQL-backed collaborators for the coordinator.

mod event_log;
mod registry;
mod settings;

pub use event_log::PgEventLog;
pub use registry::PgNodeRegistry;
pub use settings::{effective_farm_settings, load_farm_settings, save_farm_settings};

fn db_err(e: sqlx::Error) -> webfarm_core::FarmError {
    webfarm_core::FarmError::Database(e.to_string())
}
