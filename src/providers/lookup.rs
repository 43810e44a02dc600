//! ISBN catalog lookup provider (GET + JSON).

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{non_blank, BookMetadata, MetadataProvider};
use crate::config::ProvidersConfig;
use crate::models::Book;

pub struct LookupClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    items: Vec<LookupItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupItem {
    category_name: Option<String>,
    price_standard: Option<i64>,
    price_sales: Option<i64>,
    pub_date: Option<String>,
    description: Option<String>,
    toc: Option<String>,
    link: Option<String>,
    cover: Option<String>,
}

impl LookupClient {
    pub fn new(cfg: &ProvidersConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.lookup_url.clone(),
            api_key: cfg.lookup_api_key.clone(),
        })
    }

    async fn lookup(&self, isbn: &str) -> anyhow::Result<Option<BookMetadata>> {
        let mut params = vec![("isbn", isbn.to_string()), ("output", "json".to_string())];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }

        let resp = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        let body: LookupResponse = resp.json().await?;
        let Some(item) = body.items.into_iter().next() else {
            return Ok(None);
        };

        let published_at = non_blank(item.pub_date)
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());

        let meta = BookMetadata {
            category_path: non_blank(item.category_name),
            price: item.price_standard.filter(|p| *p > 0),
            sale_price: item.price_sales.filter(|p| *p > 0),
            published_at,
            description: non_blank(item.description),
            toc: non_blank(item.toc),
            info_link: non_blank(item.link),
            cover_url: non_blank(item.cover),
            tags: Vec::new(),
        };

        Ok(if meta.is_empty() { None } else { Some(meta) })
    }
}

#[async_trait]
impl MetadataProvider for LookupClient {
    fn name(&self) -> &'static str {
        "isbn-lookup"
    }

    async fn fetch(&self, book: &Book) -> Option<BookMetadata> {
        match self.lookup(&book.isbn).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(provider = self.name(), isbn = %book.isbn, error = %e,
                    "lookup failed, treating as no data");
                None
            }
        }
    }
}
