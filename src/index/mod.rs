pub mod http;

use async_trait::async_trait;

use crate::models::BookDocument;
pub use http::{HttpSearchIndex, IndexError};

/// Secondary search index. Upserts are keyed by book id, so re-projecting
/// the same book any number of times converges to one document.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, doc: &BookDocument) -> Result<(), IndexError>;
    async fn delete(&self, book_id: i64) -> Result<(), IndexError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory index double. Fails upserts for ids in `fail_ids`.
    #[derive(Default)]
    pub(crate) struct MockIndex {
        pub docs: Mutex<HashMap<i64, BookDocument>>,
        pub upserts: AtomicUsize,
        pub deletes: Mutex<Vec<i64>>,
        pub fail_ids: Mutex<HashSet<i64>>,
    }

    impl MockIndex {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn fail_for(&self, book_id: i64) {
            self.fail_ids.lock().unwrap().insert(book_id);
        }

        pub(crate) fn upsert_count(&self) -> usize {
            self.upserts.load(Ordering::SeqCst)
        }

        pub(crate) fn indexed_ids(&self) -> Vec<i64> {
            let mut ids: Vec<i64> = self.docs.lock().unwrap().keys().copied().collect();
            ids.sort_unstable();
            ids
        }
    }

    #[async_trait]
    impl SearchIndex for MockIndex {
        async fn upsert(&self, doc: &BookDocument) -> Result<(), IndexError> {
            if self.fail_ids.lock().unwrap().contains(&doc.id) {
                return Err(IndexError::Status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    doc.id,
                ));
            }
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.docs.lock().unwrap().insert(doc.id, doc.clone());
            Ok(())
        }

        async fn delete(&self, book_id: i64) -> Result<(), IndexError> {
            self.docs.lock().unwrap().remove(&book_id);
            self.deletes.lock().unwrap().push(book_id);
            Ok(())
        }
    }
}
