//! Bounded worker pool for enrichment tasks. Sized small on purpose —
//! third-party providers rate-limit, so concurrency stays at a handful of
//! outbound calls regardless of batch size.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use super::Enricher;

/// Work item dispatched by the scheduler.
#[derive(Debug, Clone, Copy)]
pub enum EnrichTask {
    /// Full fill-if-missing pass.
    Backfill(i64),
    /// Tag-only pass.
    TagFill(i64),
}

pub struct EnrichService {
    enricher: Arc<Enricher>,
    workers: usize,
}

impl EnrichService {
    pub fn new(enricher: Arc<Enricher>, workers: usize) -> Self {
        Self {
            enricher,
            workers: workers.max(1),
        }
    }

    /// Drain the task channel until all senders drop. Each task runs on its
    /// own spawned future; the semaphore provides backpressure. A failure on
    /// one record never blocks the rest — the record stays eligible for the
    /// next scheduler pass.
    pub async fn run(self, mut rx: mpsc::Receiver<EnrichTask>) {
        tracing::info!(workers = self.workers, "enrichment service started");

        let semaphore = Arc::new(Semaphore::new(self.workers));

        while let Some(task) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let enricher = self.enricher.clone();
            tokio::spawn(async move {
                match task {
                    EnrichTask::Backfill(id) => {
                        if let Err(e) = enricher.enrich(id).await {
                            tracing::error!(book_id = id, error = %e, "enrichment failed");
                        }
                    }
                    EnrichTask::TagFill(id) => {
                        if let Err(e) = enricher.fill_tags(id).await {
                            tracing::error!(book_id = id, error = %e, "tag fill failed");
                        }
                    }
                }
                drop(permit);
            });
        }

        // Channel closed. Take every permit back so inflight tasks finish
        // before shutdown; an aborted task could leave a record persisted
        // but never indexed, with no remaining backfill path.
        let _ = semaphore.acquire_many_owned(self.workers as u32).await;

        tracing::info!("enrichment service stopped");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::index::testing::MockIndex;
    use crate::models::Book;
    use crate::providers::{BookMetadata, MetadataProvider};
    use crate::storage::sqlite::testing::storage;

    /// Provider double that takes a while, so the task is still inflight
    /// when the channel closes.
    struct SlowProvider;

    #[async_trait]
    impl MetadataProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow-stub"
        }

        async fn fetch(&self, _book: &Book) -> Option<BookMetadata> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Some(BookMetadata {
                description: Some("text".into()),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn run_finishes_inflight_tasks_before_returning() {
        let (s, _dir) = storage().await;
        let index = Arc::new(MockIndex::new());
        let enricher = Arc::new(Enricher::new(
            s.clone(),
            index.clone(),
            vec![Arc::new(SlowProvider)],
            3,
        ));

        let id = s.insert_book("9788900000009", "t").await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(EnrichTask::Backfill(id)).await.unwrap();
        drop(tx);

        EnrichService::new(enricher, 2).run(rx).await;

        // The slow task completed both writes before run returned.
        let book = s.find_book(id).await.unwrap().unwrap();
        assert!(book.enriched_at.is_some());
        assert_eq!(index.upsert_count(), 1);
    }
}
