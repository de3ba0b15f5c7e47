//! Host-side runtime that walks a node through the farm lifecycle.
//!
//! Stage 1 runs before the host's warm-up, stage 2 after it, and shutdown
//! when the process is asked to stop. Farm failures are logged and never
//! stop the host from starting.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;

use webfarm_core::cluster::MessageChannel;
use webfarm_core::config::FarmConfig;
use webfarm_core::error::{FarmError, Result};
use webfarm_runtime::bus::{ChannelConfig, PgMessageChannel};
use webfarm_runtime::cluster::{CoordinatorConfig, LeadershipCoordinator};
use webfarm_runtime::db::Database;
use webfarm_runtime::migrations::MigrationRunner;
use webfarm_runtime::store::{effective_farm_settings, PgEventLog, PgNodeRegistry};

/// Prelude module for common imports.
pub mod prelude {
    pub use webfarm_core::cluster::{FarmEventType, FarmSummary, NodeRecord, PollingInterval};
    pub use webfarm_core::config::FarmConfig;
    pub use webfarm_core::error::{FarmError, Result};
    pub use webfarm_runtime::cluster::{FarmStage, LeadershipCoordinator};

    pub use crate::{Farm, FarmBuilder, ShutdownHandle};
}

type WarmUp = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send>;

/// Running web farm node.
pub struct Farm {
    config: FarmConfig,
    run_migrations: bool,
    warm_up: Option<WarmUp>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Farm {
    /// Create a new builder for configuring the farm.
    pub fn builder() -> FarmBuilder {
        FarmBuilder::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &FarmConfig {
        &self.config
    }

    /// Handle that asks a running farm to shut down.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run the node until Ctrl-C or a shutdown request.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Web farm node starting");

        let db = Database::from_config(&self.config.database).await?;
        let pool = db.primary().clone();
        tracing::info!("Connected to database");

        if self.run_migrations {
            let applied = MigrationRunner::new(pool.clone()).run().await?;
            tracing::info!(applied = applied.len(), "Migrations completed");
        }

        let settings = effective_farm_settings(&pool, &self.config.farm).await;

        let channel = Arc::new(PgMessageChannel::new(
            pool.clone(),
            ChannelConfig {
                channel: self.config.database.notify_channel.clone(),
                ..Default::default()
            },
        ));
        let listener = {
            let channel = channel.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.run().await {
                    tracing::error!(error = %e, "Farm message listener failed");
                }
            })
        };

        let coordinator = LeadershipCoordinator::new(
            Arc::new(PgNodeRegistry::new(pool.clone())),
            Arc::new(PgEventLog::new(pool.clone())),
            channel.clone() as Arc<dyn MessageChannel>,
            CoordinatorConfig {
                settings,
                node: self.config.node.clone(),
            },
        );

        coordinator.start_stage1().await;

        if let Some(warm_up) = self.warm_up {
            if let Err(e) = warm_up().await {
                tracing::error!(error = %e, "Warm-up failed");
                channel.stop();
                let _ = listener.await;
                db.close().await;
                return Err(e);
            }
        }

        coordinator.start_stage2().await;

        if let Some(node) = coordinator.local_node().await {
            tracing::info!("Web farm node started");
            tracing::info!("  Node: {} ({})", node.name, node.id);
            tracing::info!("  Polling interval: {}s", node.polling_interval);
            tracing::info!("  Job runner: {}", node.is_job_runner);
        } else {
            tracing::info!("Web farm coordination is not active for this process");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Received shutdown notification");
            }
        }

        tracing::info!("Starting graceful shutdown...");
        coordinator.shutdown().await;

        channel.stop();
        if let Err(e) = listener.await {
            tracing::warn!("Farm message listener ended abnormally: {}", e);
        }
        db.close().await;

        tracing::info!("Web farm node stopped");
        Ok(())
    }
}

/// Requests shutdown of a running [`Farm`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Request shutdown.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Builder for configuring a [`Farm`].
pub struct FarmBuilder {
    config: Option<FarmConfig>,
    run_migrations: bool,
    warm_up: Option<WarmUp>,
}

impl FarmBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            run_migrations: true,
            warm_up: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: FarmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Whether to apply the built-in migrations on start. Defaults to `true`.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Work the host does between stage 1 and stage 2, such as filling caches.
    pub fn warm_up<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.warm_up = Some(Box::new(move || Box::pin(f())));
        self
    }

    /// Build the farm runtime.
    pub fn build(self) -> Result<Farm> {
        let config = self
            .config
            .ok_or_else(|| FarmError::Config("Configuration is required".to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Farm {
            config,
            run_migrations: self.run_migrations,
            warm_up: self.warm_up,
            shutdown_tx,
        })
    }
}

impl Default for FarmBuilder {
    fn default() -> Self {
        Self::new()
    }
}
