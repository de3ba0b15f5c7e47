//! In-memory collaborators for testing web farm coordination.
//!
//! These stand in for the shared database tables and the message bus so that
//! several coordinators can run inside one test process:
//! - [`MemoryNodeRegistry`] for the node table
//! - [`MemoryEventLog`] for the farm event log
//! - [`LocalBus`] for the message channel
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(MemoryNodeRegistry::new());
//! let log = Arc::new(MemoryEventLog::new());
//! let bus = LocalBus::new();
//!
//! // ... run a coordinator against them ...
//!
//! registry.assert_node_active("web-01");
//! log.assert_logged(FarmEventType::Startup, node_id);
//! bus.assert_published("web-01", FarmEventType::Ping);
//! ```

pub mod bus;
pub mod event_log;
pub mod registry;

pub use bus::LocalBus;
pub use event_log::MemoryEventLog;
pub use registry::MemoryNodeRegistry;
