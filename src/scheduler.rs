//! Periodic discovery of enrichment candidates, gated by cross-instance
//! locks so each named job runs on at most one instance per tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::enricher::EnrichTask;
use crate::storage::locks::LockStore;
use crate::storage::CatalogStorage;

pub const JOB_ENRICH_BACKFILL: &str = "enrich-backfill";
pub const JOB_TAG_BACKFILL: &str = "tag-backfill";

pub struct Scheduler {
    storage: CatalogStorage,
    locks: Arc<dyn LockStore>,
    tasks: mpsc::Sender<EnrichTask>,
    cfg: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        storage: CatalogStorage,
        locks: Arc<dyn LockStore>,
        tasks: mpsc::Sender<EnrichTask>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            storage,
            locks,
            tasks,
            cfg,
        }
    }

    /// Tick loop. The two jobs run on independent timers and may overlap
    /// each other; each is serialized across instances by its own lock.
    pub async fn run(self, cancel: CancellationToken) {
        let mut enrich_tick =
            tokio::time::interval(Duration::from_secs(self.cfg.enrich_interval_secs));
        let mut tag_tick = tokio::time::interval(Duration::from_secs(self.cfg.tag_interval_secs));
        enrich_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tag_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            enrich_interval = self.cfg.enrich_interval_secs,
            tag_interval = self.cfg.tag_interval_secs,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduler shutting down");
                    break;
                }
                _ = enrich_tick.tick() => self.run_job(JOB_ENRICH_BACKFILL).await,
                _ = tag_tick.tick() => self.run_job(JOB_TAG_BACKFILL).await,
            }
        }
    }

    async fn run_job(&self, job: &'static str) {
        let min_hold = Duration::from_secs(self.cfg.lock_min_hold_secs);
        let max_hold = Duration::from_secs(self.cfg.lock_max_hold_secs);

        match self.locks.acquire(job, min_hold, max_hold).await {
            Ok(true) => {}
            Ok(false) => {
                // Another instance owns this tick. Expected, not an error.
                tracing::debug!(job, "lock held elsewhere, skipping tick");
                return;
            }
            Err(e) => {
                tracing::warn!(job, error = %e, "lock acquisition failed");
                return;
            }
        }

        if let Err(e) = self.dispatch(job).await {
            tracing::error!(job, error = %e, "scheduler pass failed");
        }

        if let Err(e) = self.locks.release(job).await {
            tracing::warn!(job, error = %e, "lock release failed");
        }
    }

    /// Fetch one bounded page of candidates and hand each to the worker
    /// pool. An empty page is steady state.
    async fn dispatch(&self, job: &'static str) -> anyhow::Result<()> {
        match job {
            JOB_ENRICH_BACKFILL => {
                let books = self
                    .storage
                    .find_missing_enrichment(self.cfg.enrich_batch_size)
                    .await?;
                if books.is_empty() {
                    return Ok(());
                }
                tracing::info!(count = books.len(), "dispatching enrichment candidates");
                for book in books {
                    self.tasks.send(EnrichTask::Backfill(book.id)).await?;
                }
            }
            JOB_TAG_BACKFILL => {
                let books = self
                    .storage
                    .find_missing_tags(self.cfg.tag_batch_size)
                    .await?;
                if books.is_empty() {
                    return Ok(());
                }
                tracing::info!(count = books.len(), "dispatching tagging candidates");
                for book in books {
                    self.tasks.send(EnrichTask::TagFill(book.id)).await?;
                }
            }
            other => anyhow::bail!("unknown job {other}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::locks::SqliteLockStore;
    use crate::storage::sqlite::testing::storage;

    fn test_cfg() -> SchedulerConfig {
        SchedulerConfig {
            enrich_interval_secs: 60,
            enrich_batch_size: 10,
            tag_interval_secs: 600,
            tag_batch_size: 10,
            lock_min_hold_secs: 0,
            lock_max_hold_secs: 60,
        }
    }

    #[tokio::test]
    async fn tick_dispatches_candidates_when_lock_is_free() {
        let (s, _dir) = storage().await;
        s.insert_book("isbn-1", "a").await.unwrap();
        s.insert_book("isbn-2", "b").await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(
            s.clone(),
            Arc::new(SqliteLockStore::new(&s)),
            tx,
            test_cfg(),
        );

        scheduler.run_job(JOB_ENRICH_BACKFILL).await;

        let mut dispatched = 0;
        while rx.try_recv().is_ok() {
            dispatched += 1;
        }
        assert_eq!(dispatched, 2);
    }

    #[tokio::test]
    async fn tick_is_skipped_when_another_instance_holds_the_lock() {
        let (s, _dir) = storage().await;
        s.insert_book("isbn-1", "a").await.unwrap();

        let other = SqliteLockStore::new(&s);
        assert!(other
            .acquire(
                JOB_ENRICH_BACKFILL,
                Duration::ZERO,
                Duration::from_secs(60)
            )
            .await
            .unwrap());

        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(
            s.clone(),
            Arc::new(SqliteLockStore::new(&s)),
            tx,
            test_cfg(),
        );

        scheduler.run_job(JOB_ENRICH_BACKFILL).await;
        assert!(rx.try_recv().is_err());
    }
}
