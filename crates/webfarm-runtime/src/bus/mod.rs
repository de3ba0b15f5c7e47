mod postgres;

pub use postgres::{ChannelConfig, PgMessageChannel, MAX_NOTIFY_PAYLOAD_BYTES};
