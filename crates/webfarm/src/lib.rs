//! Web farm coordination for a host application.
//!
//! Every node runs [`Farm`], which registers the node, negotiates a polling
//! interval, and keeps the shared node table's leadership and liveness flags
//! current.

mod runtime;

pub use webfarm_core;
pub use webfarm_runtime;

pub use runtime::prelude;
pub use runtime::{Farm, FarmBuilder, ShutdownHandle};
