use async_trait::async_trait;
use sqlx::{PgPool, Row};

use webfarm_core::cluster::{EventLog, FarmEventType, NodeId, NodeLogEntry};
use webfarm_core::{FarmError, Result};

use super::db_err;

/// Event log stored in the `webfarm_node_logs` table.
#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    /// Create an event log over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(
        &self,
        writer: NodeId,
        subject: NodeId,
        event_type: FarmEventType,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webfarm_node_logs (writer_node_id, node_id, event_type, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(writer.as_i64())
        .bind(subject.as_i64())
        .bind(event_type.as_str())
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<NodeLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, writer_node_id, node_id, event_type, message, created_at
            FROM webfarm_node_logs
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let event_type: String = row.try_get("event_type")?;
            let event_type = FarmEventType::from_str(&event_type).ok_or_else(|| {
                FarmError::Serialization(format!("Unknown farm event type: {}", event_type))
            })?;

            entries.push(NodeLogEntry {
                id: row.try_get("id")?,
                writer_node_id: NodeId(row.try_get("writer_node_id")?),
                node_id: NodeId(row.try_get("node_id")?),
                event_type,
                message: row.try_get("message")?,
                created_at: row.try_get("created_at")?,
            });
        }

        Ok(entries)
    }
}
