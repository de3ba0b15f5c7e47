use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use webfarm_core::cluster::{NodeId, NodeRecord, NodeRegistry, PollingInterval};
use webfarm_core::{FarmError, Result};

use super::db_err;

const NODE_COLUMNS: &str = r#"
    id, node_name, is_active, is_leader, is_current_job_runner,
    configured_polling_interval_ds, current_polling_interval_ds,
    last_seen_at, last_restart_at, stopped_at
"#;

/// Node registry stored in the `webfarm_nodes` table.
#[derive(Clone)]
pub struct PgNodeRegistry {
    pool: PgPool,
}

impl PgNodeRegistry {
    /// Create a registry over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Column value for an interval. Intervals past the `INTEGER` range are rejected.
fn interval_column(interval: PollingInterval) -> Result<i32> {
    i32::try_from(interval.deciseconds()).map_err(|_| {
        FarmError::Validation(format!(
            "Polling interval {}s is too large to store",
            interval
        ))
    })
}

fn interval_to_db(interval: Option<PollingInterval>) -> Result<Option<i32>> {
    interval.map(interval_column).transpose()
}

fn interval_from_db(ds: Option<i32>) -> Option<PollingInterval> {
    ds.and_then(|ds| u32::try_from(ds).ok())
        .filter(|ds| *ds > 0)
        .map(PollingInterval::from_deciseconds)
}

fn node_from_row(row: &PgRow) -> Result<NodeRecord> {
    Ok(NodeRecord {
        id: NodeId(row.try_get("id")?),
        name: row.try_get("node_name")?,
        is_active: row.try_get("is_active")?,
        is_leader: row.try_get("is_leader")?,
        is_current_job_runner: row.try_get("is_current_job_runner")?,
        configured_polling_interval: interval_from_db(row.try_get("configured_polling_interval_ds")?),
        current_polling_interval: interval_from_db(row.try_get("current_polling_interval_ds")?),
        last_seen_at: row.try_get("last_seen_at")?,
        last_restart_at: row.try_get("last_restart_at")?,
        stopped_at: row.try_get("stopped_at")?,
    })
}

#[async_trait]
impl NodeRegistry for PgNodeRegistry {
    async fn find_by_name(&self, name: &str) -> Result<Option<NodeRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webfarm_nodes WHERE node_name = $1",
            NODE_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(node_from_row).transpose()
    }

    async fn create(&self, record: &NodeRecord) -> Result<NodeId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO webfarm_nodes (
                node_name, is_active, is_leader, is_current_job_runner,
                configured_polling_interval_ds, current_polling_interval_ds,
                last_seen_at, last_restart_at, stopped_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&record.name)
        .bind(record.is_active)
        .bind(record.is_leader)
        .bind(record.is_current_job_runner)
        .bind(interval_to_db(record.configured_polling_interval)?)
        .bind(interval_to_db(record.current_polling_interval)?)
        .bind(record.last_seen_at)
        .bind(record.last_restart_at)
        .bind(record.stopped_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(NodeId(id))
    }

    async fn update(&self, record: &NodeRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE webfarm_nodes SET
                is_active = $2,
                is_leader = $3,
                is_current_job_runner = $4,
                configured_polling_interval_ds = $5,
                current_polling_interval_ds = $6,
                last_seen_at = $7,
                last_restart_at = $8,
                stopped_at = $9
            WHERE node_name = $1
            "#,
        )
        .bind(&record.name)
        .bind(record.is_active)
        .bind(record.is_leader)
        .bind(record.is_current_job_runner)
        .bind(interval_to_db(record.configured_polling_interval)?)
        .bind(interval_to_db(record.current_polling_interval)?)
        .bind(record.last_seen_at)
        .bind(record.last_restart_at)
        .bind(record.stopped_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("Web farm node {}", record.name)));
        }

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM webfarm_nodes ORDER BY node_name",
            NODE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(node_from_row).collect()
    }

    async fn exists_with_interval(
        &self,
        exclude_name: &str,
        interval: PollingInterval,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM webfarm_nodes
                WHERE node_name <> $1 AND current_polling_interval_ds = $2
            )
            "#,
        )
        .bind(exclude_name)
        .bind(interval_column(interval)?)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(exists)
    }

    async fn assert_leader(&self, leader_name: &str, seen_at: DateTime<Utc>) -> Result<()> {
        // Only the leader's last_seen_at is written so a concurrent pong update
        // for another node survives.
        sqlx::query(
            r#"
            UPDATE webfarm_nodes SET
                is_leader = (node_name = $1),
                last_seen_at = CASE WHEN node_name = $1 THEN $2 ELSE last_seen_at END
            WHERE node_name = $1 OR is_leader
            "#,
        )
        .bind(leader_name)
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}
