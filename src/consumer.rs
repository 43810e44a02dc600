//! Sync consumer and reindexer: resolves the record set behind a sync
//! instruction and re-projects each book into the search index.
//!
//! Resilience is graded per record — one bad document never aborts the
//! batch. Query failures (and pages where every single record fails, the
//! signature of an index outage) propagate so the channel redelivers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::index::SearchIndex;
use crate::models::{SyncInstruction, SyncTarget};
use crate::queue::SyncQueue;
use crate::storage::CatalogStorage;

pub struct Reindexer {
    storage: CatalogStorage,
    index: Arc<dyn SearchIndex>,
    page_size: i64,
}

impl Reindexer {
    pub fn new(storage: CatalogStorage, index: Arc<dyn SearchIndex>, page_size: i64) -> Self {
        Self {
            storage,
            index,
            page_size: page_size.max(1),
        }
    }

    /// Re-project every book affected by the instruction. Returns the number
    /// of documents written.
    pub async fn apply(&self, instruction: &SyncInstruction) -> anyhow::Result<usize> {
        match instruction.kind {
            SyncTarget::Category => {
                let ids = self.storage.category_subtree(instruction.target_id).await?;
                if ids.is_empty() {
                    tracing::debug!(category_id = instruction.target_id, "category gone, nothing to sync");
                    return Ok(0);
                }
                let mut total = 0;
                let mut page = 0;
                loop {
                    let books = self
                        .storage
                        .find_by_category_ids(&ids, page, self.page_size)
                        .await?;
                    if books.is_empty() {
                        break;
                    }
                    total += self.project_batch(&books).await?;
                    page += 1;
                }
                Ok(total)
            }
            SyncTarget::Tag => {
                let mut total = 0;
                let mut page = 0;
                loop {
                    let books = self
                        .storage
                        .find_by_tag_id(instruction.target_id, page, self.page_size)
                        .await?;
                    if books.is_empty() {
                        break;
                    }
                    total += self.project_batch(&books).await?;
                    page += 1;
                }
                Ok(total)
            }
        }
    }

    /// Admin-triggered full walk of the catalog, id-cursor-paginated so it
    /// stays correct under concurrent inserts.
    pub async fn reindex_all(&self) -> anyhow::Result<usize> {
        let mut cursor = 0i64;
        let mut total = 0;
        let mut pages = 0;
        loop {
            let books = self.storage.find_all_after_id(cursor, self.page_size).await?;
            let Some(last) = books.last() else {
                break;
            };
            cursor = last.id;
            pages += 1;

            for book in &books {
                match self.project_book(book.id).await {
                    Ok(true) => total += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(book_id = book.id, error = %e,
                            "failed to reindex book, continuing");
                    }
                }
            }
        }
        tracing::info!(total, pages, "full reindex complete");
        Ok(total)
    }

    /// Per-record isolation: individual failures are logged and skipped. If
    /// a whole page fails with zero successes, the index itself is likely
    /// down — bail so the message is redelivered instead of acked empty.
    async fn project_batch(&self, books: &[crate::models::Book]) -> anyhow::Result<usize> {
        let mut indexed = 0;
        let mut failed = 0;
        for book in books {
            match self.project_book(book.id).await {
                Ok(true) => indexed += 1,
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    tracing::warn!(book_id = book.id, error = %e,
                        "failed to reindex book, continuing");
                }
            }
        }
        if indexed == 0 && failed > 0 {
            anyhow::bail!("all {failed} records in page failed to index");
        }
        Ok(indexed)
    }

    async fn project_book(&self, book_id: i64) -> anyhow::Result<bool> {
        let Some(doc) = self.storage.book_document(book_id).await? else {
            return Ok(false);
        };
        self.index.upsert(&doc).await?;
        Ok(true)
    }
}

pub struct SyncConsumer {
    queue: Arc<SyncQueue>,
    reindexer: Reindexer,
    poll_interval: Duration,
    inflight_timeout: Duration,
}

impl SyncConsumer {
    pub fn new(
        queue: Arc<SyncQueue>,
        reindexer: Reindexer,
        poll_interval: Duration,
        inflight_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            reindexer,
            poll_interval,
            inflight_timeout,
        }
    }

    /// Poll loop: one instruction at a time. Ok → ack; Err → nack so the
    /// channel redelivers per its retry/dead-letter policy.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("sync consumer started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("sync consumer shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.queue.requeue_stale(self.inflight_timeout).await {
                Ok(n) if n > 0 => tracing::warn!(count = n, "requeued stale inflight messages"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "stale requeue failed"),
            }

            if let Ok(depth) = self.queue.pending_count().await {
                if depth > 0 {
                    tracing::debug!(depth, "sync backlog");
                }
            }

            self.drain(&cancel).await;
        }
    }

    /// Drain everything currently pending before sleeping again. A nack ends
    /// the pass: the failed message waits out the next poll interval instead
    /// of being re-dequeued immediately and burning its whole attempt budget
    /// within a single outage.
    async fn drain(&self, cancel: &CancellationToken) {
        loop {
            let delivery = match self.queue.dequeue().await {
                Ok(Some(d)) => d,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "dequeue failed");
                    break;
                }
            };

            match self.reindexer.apply(&delivery.instruction).await {
                Ok(count) => {
                    tracing::info!(
                        target_id = delivery.instruction.target_id,
                        kind = ?delivery.instruction.kind,
                        count,
                        "sync instruction applied"
                    );
                    if let Err(e) = self.queue.ack(delivery.id).await {
                        tracing::warn!(error = %e, "ack failed");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        target_id = delivery.instruction.target_id,
                        attempt = delivery.attempt,
                        error = %e,
                        "sync failed, returning message for redelivery"
                    );
                    if let Err(e) = self.queue.nack(delivery.id).await {
                        tracing::warn!(error = %e, "nack failed");
                    }
                    break;
                }
            }

            if cancel.is_cancelled() {
                break;
            }
        }
    }
}
