use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use webfarm_core::cluster::{FarmMessage, MessageChannel};
use webfarm_core::{FarmError, Result};

/// PostgreSQL rejects NOTIFY payloads of 8000 bytes or more.
pub const MAX_NOTIFY_PAYLOAD_BYTES: usize = 7999;

/// Message channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// PostgreSQL channel name for farm messages.
    pub channel: String,
    /// Buffer size for the inbound broadcast.
    pub buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel: "webfarm_events".to_string(),
            buffer_size: 1024,
        }
    }
}

/// Farm message channel over PostgreSQL LISTEN/NOTIFY.
///
/// Every node listens on the same channel, so a node also receives its own
/// messages. Handlers filter those out.
pub struct PgMessageChannel {
    pool: sqlx::PgPool,
    config: ChannelConfig,
    running: Arc<AtomicBool>,
    message_tx: broadcast::Sender<FarmMessage>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PgMessageChannel {
    /// Create a new message channel.
    pub fn new(pool: sqlx::PgPool, config: ChannelConfig) -> Self {
        let (message_tx, _) = broadcast::channel(config.buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            pool,
            config,
            running: Arc::new(AtomicBool::new(false)),
            message_tx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    /// Check if the listener is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the listener.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the listener loop until stopped.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let mut listener = sqlx::postgres::PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| FarmError::Channel(e.to_string()))?;

        listener
            .listen(&self.config.channel)
            .await
            .map_err(|e| FarmError::Channel(e.to_string()))?;

        tracing::info!("Listening for farm messages on channel: {}", self.config.channel);

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                notification = listener.recv() => {
                    match notification {
                        Ok(notification) => {
                            if let Some(message) = parse_notification(notification.payload()) {
                                let _ = self.message_tx.send(message);
                            }
                        }
                        Err(e) => {
                            // PgListener reconnects on the next recv.
                            tracing::warn!("Error receiving farm message: {}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Farm message listener shutting down");
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Encode a message as a NOTIFY payload.
fn encode(message: &FarmMessage) -> Result<String> {
    let payload = serde_json::to_string(message)?;
    if payload.len() > MAX_NOTIFY_PAYLOAD_BYTES {
        return Err(FarmError::Channel(format!(
            "Farm message is {} bytes, NOTIFY allows at most {}",
            payload.len(),
            MAX_NOTIFY_PAYLOAD_BYTES
        )));
    }
    Ok(payload)
}

/// Decode a NOTIFY payload. Malformed payloads are logged and dropped.
fn parse_notification(payload: &str) -> Option<FarmMessage> {
    match serde_json::from_str(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed farm message: {}", payload);
            None
        }
    }
}

#[async_trait]
impl MessageChannel for PgMessageChannel {
    async fn publish(&self, message: FarmMessage) -> Result<()> {
        let payload = encode(&message)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.config.channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| FarmError::Channel(e.to_string()))?;

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FarmMessage> {
        self.message_tx.subscribe()
    }
}
