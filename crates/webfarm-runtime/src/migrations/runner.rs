//! Migration runner safe to call from every node at once.
//!
//! Only one node applies migrations at a time, serialized by a PostgreSQL
//! advisory lock held on a dedicated connection.

use std::collections::HashSet;

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, info, warn};

use webfarm_core::{FarmError, Result};

/// Advisory lock key, "WEBFARM" in ASCII.
const MIGRATION_LOCK_ID: i64 = 0x5745_4246_4152_4D;

/// A single migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique name, e.g. "0001_webfarm".
    pub name: String,
    /// SQL to execute.
    pub sql: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Applies the built-in migrations that have not run yet.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending built-in migrations. Returns the names applied.
    pub async fn run(&self) -> Result<Vec<String>> {
        self.run_migrations(super::builtin::builtin_migrations()).await
    }

    async fn run_migrations(&self, migrations: Vec<Migration>) -> Result<Vec<String>> {
        // Session-level advisory locks belong to a connection, so lock, apply
        // and unlock all go through the same one.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| FarmError::Database(format!("Failed to acquire connection: {}", e)))?;

        acquire_lock(&mut conn).await?;
        let result = apply_pending(&mut conn, migrations).await;

        if let Err(e) = release_lock(&mut conn).await {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }
}

async fn acquire_lock(conn: &mut PoolConnection<Postgres>) -> Result<()> {
    debug!("Acquiring migration lock...");
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut **conn)
        .await
        .map_err(|e| FarmError::Database(format!("Failed to acquire migration lock: {}", e)))?;
    debug!("Migration lock acquired");
    Ok(())
}

async fn release_lock(conn: &mut PoolConnection<Postgres>) -> Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut **conn)
        .await
        .map_err(|e| FarmError::Database(format!("Failed to release migration lock: {}", e)))?;
    debug!("Migration lock released");
    Ok(())
}

async fn apply_pending(
    conn: &mut PoolConnection<Postgres>,
    migrations: Vec<Migration>,
) -> Result<Vec<String>> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webfarm_migrations (
            id SERIAL PRIMARY KEY,
            name VARCHAR(255) UNIQUE NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut **conn)
    .await
    .map_err(|e| FarmError::Database(format!("Failed to create migrations table: {}", e)))?;

    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM webfarm_migrations")
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| FarmError::Database(format!("Failed to get applied migrations: {}", e)))?;
    let applied: HashSet<String> = rows.into_iter().map(|(name,)| name).collect();
    debug!("Already applied migrations: {:?}", applied);

    let mut newly_applied = Vec::new();
    for migration in migrations {
        if applied.contains(&migration.name) {
            continue;
        }
        apply_migration(conn, &migration).await?;
        newly_applied.push(migration.name);
    }

    Ok(newly_applied)
}

async fn apply_migration(conn: &mut PoolConnection<Postgres>, migration: &Migration) -> Result<()> {
    info!("Applying migration: {}", migration.name);

    for statement in split_sql_statements(&migration.sql) {
        sqlx::query(&statement)
            .execute(&mut **conn)
            .await
            .map_err(|e| {
                FarmError::Database(format!(
                    "Failed to apply migration '{}': {}",
                    migration.name, e
                ))
            })?;
    }

    sqlx::query("INSERT INTO webfarm_migrations (name) VALUES ($1)")
        .bind(&migration.name)
        .execute(&mut **conn)
        .await
        .map_err(|e| {
            FarmError::Database(format!(
                "Failed to record migration '{}': {}",
                migration.name, e
            ))
        })?;

    info!("Migration applied: {}", migration.name);
    Ok(())
}

/// Split SQL into statements, dropping `--` comment lines.
///
/// The built-in schema has no string literals or function bodies containing
/// semicolons, so a plain split is enough.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let without_comments: String = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}
