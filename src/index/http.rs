//! HTTP client for the search cluster. Document API compatible with
//! OpenSearch/Elasticsearch-style `_doc` endpoints.

use async_trait::async_trait;
use thiserror::Error;

use super::SearchIndex;
use crate::config::IndexConfig;
use crate::models::BookDocument;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Index returned status {0} for book {1}")]
    Status(reqwest::StatusCode, i64),
}

pub struct HttpSearchIndex {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl HttpSearchIndex {
    pub fn new(cfg: &IndexConfig) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            index: cfg.index_name.clone(),
        })
    }

    fn doc_url(&self, book_id: i64) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, book_id)
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, doc: &BookDocument) -> Result<(), IndexError> {
        let resp = self
            .client
            .put(self.doc_url(doc.id))
            .json(doc)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IndexError::Status(resp.status(), doc.id));
        }
        tracing::debug!(book_id = doc.id, "index document upserted");
        Ok(())
    }

    async fn delete(&self, book_id: i64) -> Result<(), IndexError> {
        let resp = self.client.delete(self.doc_url(book_id)).send().await?;
        // Deleting an absent document is fine — delete is idempotent.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(IndexError::Status(resp.status(), book_id));
        }
        tracing::debug!(book_id, "index document deleted");
        Ok(())
    }
}
