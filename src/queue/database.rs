use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::{
    error::{QueueError, QueueResult},
    traits::{QueueEntry, QueueItem, WorkQueue, lease_expiry, truncate_to_millis},
};
use crate::db::sqlite::common::{from_millis, parse_uuid};

/// Database-backed work queue stored in the `queue_items` table.
///
/// Claims are a single `UPDATE ... RETURNING`, so two runners never lease the
/// same entry at the same time.
pub struct DatabaseQueue {
    pool: SqlitePool,
}

impl DatabaseQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn entry_from_row(row: &SqliteRow) -> QueueResult<QueueEntry> {
        let id: String = row.get("id");
        let payload: String = row.get("payload");
        let attempts: i64 = row.get("attempts");
        let created_at: i64 = row.get("created_at");
        let claimed_until: Option<i64> = row.get("claimed_until");

        let item: QueueItem = serde_json::from_str(&payload)
            .map_err(|e| QueueError::Deserialization(e.to_string()))?;

        Ok(QueueEntry {
            id: parse_uuid(&id).map_err(|e| QueueError::Internal(e.to_string()))?,
            producer: row.get("producer"),
            item,
            attempts: u32::try_from(attempts)
                .map_err(|_| QueueError::Internal(format!("Invalid attempt count: {attempts}")))?,
            created_at: from_millis(created_at).map_err(|e| QueueError::Internal(e.to_string()))?,
            claimed_until: claimed_until
                .map(from_millis)
                .transpose()
                .map_err(|e| QueueError::Internal(e.to_string()))?,
        })
    }
}

#[async_trait]
impl WorkQueue for DatabaseQueue {
    async fn enqueue(&self, producer: &str, item: QueueItem) -> QueueResult<Uuid> {
        let entry = QueueEntry::new(producer, item);
        let payload =
            serde_json::to_string(&entry.item).map_err(|e| QueueError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO queue_items (id, producer, payload, attempts, created_at)
            VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.producer)
        .bind(&payload)
        .bind(entry.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(entry.id)
    }

    async fn claim(&self, producer: &str, lease: Duration) -> QueueResult<Option<QueueEntry>> {
        let now = truncate_to_millis(Utc::now());
        let expires = lease_expiry(now, lease);

        let row = sqlx::query(
            r#"
            UPDATE queue_items
            SET claimed_until = ?, attempts = attempts + 1
            WHERE seq = (
                SELECT seq FROM queue_items
                WHERE producer = ?
                  AND (claimed_until IS NULL OR claimed_until <= ?)
                ORDER BY seq ASC
                LIMIT 1
            )
            RETURNING id, producer, payload, attempts, created_at, claimed_until
            "#,
        )
        .bind(expires.timestamp_millis())
        .bind(producer)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn complete(&self, id: Uuid) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM queue_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, id: Uuid, delay: Duration) -> QueueResult<bool> {
        let retry_at = lease_expiry(truncate_to_millis(Utc::now()), delay);
        let result = sqlx::query("UPDATE queue_items SET claimed_until = ? WHERE id = ?")
            .bind(retry_at.timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_producer(&self, producer: &str) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM queue_items WHERE producer = ?")
            .bind(producer)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn len(&self, producer: &str) -> QueueResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE producer = ?")
            .bind(producer)
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count)
            .map_err(|_| QueueError::Internal(format!("Invalid queue length: {count}")))
    }
}
