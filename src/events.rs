//! Rename operations with commit-gated sync notifications.
//!
//! Instructions are recorded into a local outbox while the transaction is
//! open and published to the durable channel only after the commit returns.
//! Dropping the outbox on any error path discards them, so a rolled-back
//! rename never triggers a reindex.

use std::sync::Arc;

use crate::models::{truncate_chars, SyncInstruction, CATEGORY_NAME_MAX, TAG_NAME_MAX};
use crate::queue::SyncQueue;
use crate::storage::CatalogStorage;

/// Two-phase local event queue: record during the transaction, flush after
/// commit. Never flushed twice — `flush` consumes it.
#[derive(Debug, Default)]
pub struct PendingSync {
    events: Vec<SyncInstruction>,
}

impl PendingSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, instruction: SyncInstruction) {
        self.events.push(instruction);
    }

    pub async fn flush(self, queue: &SyncQueue) -> Result<(), crate::queue::QueueError> {
        for event in &self.events {
            queue.publish(event).await?;
        }
        Ok(())
    }
}

/// Admin-facing catalog mutations that must keep the search index in sync.
pub struct CatalogService {
    storage: CatalogStorage,
    queue: Arc<SyncQueue>,
}

impl CatalogService {
    pub fn new(storage: CatalogStorage, queue: Arc<SyncQueue>) -> Self {
        Self { storage, queue }
    }

    /// Rename a category. Returns false when the name is unchanged, in which
    /// case nothing is written and no sync instruction fires.
    pub async fn rename_category(&self, id: i64, new_name: &str) -> anyhow::Result<bool> {
        let new_name = truncate_chars(new_name.trim(), CATEGORY_NAME_MAX);

        let mut outbox = PendingSync::new();
        let mut tx = self.storage.begin().await?;

        let Some(current) = CatalogStorage::category_name_tx(&mut tx, id).await? else {
            anyhow::bail!("category {id} not found");
        };
        if current == new_name {
            tracing::debug!(id, name = %new_name, "category name unchanged, skipping");
            return Ok(false);
        }

        CatalogStorage::set_category_name_tx(&mut tx, id, &new_name).await?;
        outbox.record(SyncInstruction::category(id));

        tx.commit().await?;
        outbox.flush(&self.queue).await?;

        tracing::info!(id, from = %current, to = %new_name, "category renamed");
        Ok(true)
    }

    /// Rename a tag. Same commit-gated notification as categories.
    pub async fn rename_tag(&self, id: i64, new_name: &str) -> anyhow::Result<bool> {
        let new_name = truncate_chars(new_name.trim(), TAG_NAME_MAX);

        let mut outbox = PendingSync::new();
        let mut tx = self.storage.begin().await?;

        let Some(current) = CatalogStorage::tag_name_tx(&mut tx, id).await? else {
            anyhow::bail!("tag {id} not found");
        };
        if current == new_name {
            tracing::debug!(id, name = %new_name, "tag name unchanged, skipping");
            return Ok(false);
        }

        CatalogStorage::set_tag_name_tx(&mut tx, id, &new_name).await?;
        outbox.record(SyncInstruction::tag(id));

        tx.commit().await?;
        outbox.flush(&self.queue).await?;

        tracing::info!(id, from = %current, to = %new_name, "tag renamed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncTarget;
    use crate::storage::sqlite::testing::storage;

    #[tokio::test]
    async fn committed_rename_emits_exactly_one_instruction() {
        let (s, _dir) = storage().await;
        let queue = Arc::new(SyncQueue::new(&s, 3));
        let service = CatalogService::new(s.clone(), queue.clone());

        let id = s.ensure_category("A", None).await.unwrap();
        assert!(service.rename_category(id, "B").await.unwrap());

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        let delivery = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(delivery.instruction.target_id, id);
        assert_eq!(delivery.instruction.kind, SyncTarget::Category);

        assert_eq!(s.find_category(id).await.unwrap().unwrap().name, "B");
    }

    #[tokio::test]
    async fn unchanged_name_emits_nothing() {
        let (s, _dir) = storage().await;
        let queue = Arc::new(SyncQueue::new(&s, 3));
        let service = CatalogService::new(s.clone(), queue.clone());

        let id = s.ensure_category("A", None).await.unwrap();
        assert!(!service.rename_category(id, " A ").await.unwrap());
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rolled_back_rename_emits_nothing() {
        let (s, _dir) = storage().await;
        let queue = Arc::new(SyncQueue::new(&s, 3));

        let id = s.ensure_category("A", None).await.unwrap();

        // Same write path as the service, but the transaction is dropped
        // before commit — the outbox must be discarded with it.
        {
            let mut outbox = PendingSync::new();
            let mut tx = s.begin().await.unwrap();
            CatalogStorage::set_category_name_tx(&mut tx, id, "B")
                .await
                .unwrap();
            outbox.record(SyncInstruction::category(id));
            // tx and outbox dropped here: rollback, no flush
        }

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(s.find_category(id).await.unwrap().unwrap().name, "A");
    }

    #[tokio::test]
    async fn rename_missing_tag_is_an_error() {
        let (s, _dir) = storage().await;
        let queue = Arc::new(SyncQueue::new(&s, 3));
        let service = CatalogService::new(s.clone(), queue.clone());

        assert!(service.rename_tag(404, "x").await.is_err());
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }
}
