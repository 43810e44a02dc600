//! Cross-instance job leases over the shared store.
//!
//! A lock row is held from acquisition until `max_hold_until`, after which
//! any instance may take it over (force-release if the holder crashed).
//! Release shrinks the lease down to `min_hold_until` so fast jobs still
//! keep other instances out for the minimum duration.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::sqlite::{CatalogStorage, Result};

/// Pluggable lease interface; implementable over any shared KV store.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Try to take the named lock. Returns false when another holder has it
    /// and its maximum hold time has not yet passed.
    async fn acquire(&self, job: &str, min_hold: Duration, max_hold: Duration) -> Result<bool>;

    /// Give the lock back, keeping it reserved until its minimum hold time.
    async fn release(&self, job: &str) -> Result<()>;
}

pub struct SqliteLockStore {
    pool: SqlitePool,
    /// Identifies this process instance across the fleet.
    holder: String,
}

impl SqliteLockStore {
    pub fn new(storage: &CatalogStorage) -> Self {
        Self {
            pool: storage.pool().clone(),
            holder: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn acquire(&self, job: &str, min_hold: Duration, max_hold: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        // Single compare-and-swap: insert wins, or take over an expired row.
        let result = sqlx::query(
            "INSERT INTO job_locks (job_name, holder, locked_at, min_hold_until, max_hold_until) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(job_name) DO UPDATE SET \
                 holder = excluded.holder, \
                 locked_at = excluded.locked_at, \
                 min_hold_until = excluded.min_hold_until, \
                 max_hold_until = excluded.max_hold_until \
             WHERE job_locks.max_hold_until <= excluded.locked_at",
        )
        .bind(job)
        .bind(&self.holder)
        .bind(now)
        .bind(now + min_hold.as_millis() as i64)
        .bind(now + max_hold.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, job: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE job_locks SET max_hold_until = MAX(min_hold_until, ?1) \
             WHERE job_name = ?2 AND holder = ?3",
        )
        .bind(now)
        .bind(job)
        .bind(&self.holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::sqlite::testing::storage;

    const MIN: Duration = Duration::from_millis(0);
    const MAX: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn second_holder_is_denied() {
        let (s, _dir) = storage().await;
        let a = SqliteLockStore::new(&s);
        let b = SqliteLockStore::new(&s);

        assert!(a.acquire("job", MIN, MAX).await.unwrap());
        assert!(!b.acquire("job", MIN, MAX).await.unwrap());

        // Different job names do not contend.
        assert!(b.acquire("other-job", MIN, MAX).await.unwrap());
    }

    #[tokio::test]
    async fn released_lock_can_be_reacquired() {
        let (s, _dir) = storage().await;
        let a = SqliteLockStore::new(&s);
        let b = SqliteLockStore::new(&s);

        assert!(a.acquire("job", MIN, MAX).await.unwrap());
        a.release("job").await.unwrap();
        assert!(b.acquire("job", MIN, MAX).await.unwrap());
    }

    #[tokio::test]
    async fn min_hold_keeps_lock_after_release() {
        let (s, _dir) = storage().await;
        let a = SqliteLockStore::new(&s);
        let b = SqliteLockStore::new(&s);

        assert!(a.acquire("job", Duration::from_secs(60), MAX).await.unwrap());
        a.release("job").await.unwrap();
        // Released, but the minimum hold window has not elapsed.
        assert!(!b.acquire("job", MIN, MAX).await.unwrap());
    }

    #[tokio::test]
    async fn expired_max_hold_is_taken_over() {
        let (s, _dir) = storage().await;
        let a = SqliteLockStore::new(&s);
        let b = SqliteLockStore::new(&s);

        // Holder "crashes": max hold of zero expires immediately.
        assert!(a.acquire("job", MIN, Duration::ZERO).await.unwrap());
        assert!(b.acquire("job", MIN, MAX).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_acquirers_get_exactly_one_lock() {
        let (s, _dir) = storage().await;
        let a = Arc::new(SqliteLockStore::new(&s));
        let b = Arc::new(SqliteLockStore::new(&s));

        let (ra, rb) = tokio::join!(
            tokio::spawn({
                let a = a.clone();
                async move { a.acquire("job", MIN, MAX).await.unwrap() }
            }),
            tokio::spawn({
                let b = b.clone();
                async move { b.acquire("job", MIN, MAX).await.unwrap() }
            }),
        );

        let wins = [ra.unwrap(), rb.unwrap()].iter().filter(|w| **w).count();
        assert_eq!(wins, 1);
    }
}
