//! Durable search-sync channel over the shared store.
//!
//! At-least-once delivery: `dequeue` marks a message inflight, `ack` removes
//! it, `nack` puts it back for redelivery (or dead-letters it once the
//! attempt budget is spent). Inflight messages whose consumer died are
//! requeued after a visibility timeout. Messages survive process restarts.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::SyncInstruction;
use crate::storage::CatalogStorage;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A dequeued message. `id` is the broker-side delivery handle.
#[derive(Debug)]
pub struct Delivery {
    pub id: i64,
    pub attempt: i64,
    pub instruction: SyncInstruction,
}

pub struct SyncQueue {
    pool: SqlitePool,
    max_attempts: i64,
}

impl SyncQueue {
    pub fn new(storage: &CatalogStorage, max_attempts: i64) -> Self {
        Self {
            pool: storage.pool().clone(),
            max_attempts,
        }
    }

    /// Append a JSON-serialized instruction to the channel.
    pub async fn publish(&self, instruction: &SyncInstruction) -> Result<()> {
        let payload = serde_json::to_string(instruction)?;
        sqlx::query("INSERT INTO sync_queue (payload, enqueued_at) VALUES (?, ?)")
            .bind(&payload)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        tracing::debug!(payload, "sync instruction published");
        Ok(())
    }

    /// Claim the oldest pending message, if any. The claim is atomic so two
    /// consumer instances never receive the same delivery.
    pub async fn dequeue(&self) -> Result<Option<Delivery>> {
        let row = sqlx::query_as::<_, (i64, i64, String)>(
            "UPDATE sync_queue SET state = 'inflight', locked_at = ?1 \
             WHERE id = (SELECT id FROM sync_queue WHERE state = 'pending' ORDER BY id LIMIT 1) \
               AND state = 'pending' \
             RETURNING id, attempts, payload",
        )
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, attempts, payload)) = row else {
            return Ok(None);
        };

        match serde_json::from_str(&payload) {
            Ok(instruction) => Ok(Some(Delivery {
                id,
                attempt: attempts,
                instruction,
            })),
            Err(e) => {
                // Poison message: dead-letter it instead of looping forever.
                tracing::warn!(id, error = %e, "unparseable sync payload, dead-lettering");
                sqlx::query("UPDATE sync_queue SET state = 'dead' WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Successful consume: drop the message.
    pub async fn ack(&self, delivery_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(delivery_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Failed consume: return the message for redelivery, or dead-letter it
    /// once the attempt budget is exhausted.
    pub async fn nack(&self, delivery_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET attempts = attempts + 1, locked_at = NULL, \
             state = CASE WHEN attempts + 1 >= ?1 THEN 'dead' ELSE 'pending' END \
             WHERE id = ?2",
        )
        .bind(self.max_attempts)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return inflight messages whose consumer went away. Called on each
    /// consumer poll; `timeout` is the visibility window.
    pub async fn requeue_stale(&self, timeout: Duration) -> Result<u64> {
        let deadline = Utc::now().timestamp_millis() - timeout.as_millis() as i64;
        let result = sqlx::query(
            "UPDATE sync_queue SET state = 'pending', locked_at = NULL \
             WHERE state = 'inflight' AND locked_at <= ?",
        )
        .bind(deadline)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn pending_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sync_queue WHERE state = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?)
    }
}
