use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use webfarm_core::config::DatabaseConfig;
use webfarm_core::{FarmError, Result};

/// Connection pool for the database every farm node shares.
#[derive(Clone)]
pub struct Database {
    primary: Arc<PgPool>,
}

impl Database {
    /// Connect using the given configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(FarmError::Config("database.url is not set".into()));
        }

        let primary = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| FarmError::Database(format!("Failed to connect: {}", e)))?;

        Ok(Self {
            primary: Arc::new(primary),
        })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            primary: Arc::new(pool),
        }
    }

    /// Get the pool.
    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.primary.as_ref())
            .await
            .map_err(|e| FarmError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        self.primary.close().await;
    }
}
