//! External metadata providers. Every wrapper normalizes failures to
//! "no data" at this boundary — transport errors, timeouts and malformed
//! payloads never cross into the enrichment engine.

pub mod generator;
pub mod lookup;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::Book;
pub use generator::GenerativeClient;
pub use lookup::LookupClient;

/// Partial metadata for one book, as much as a single provider knows.
#[derive(Debug, Clone, Default)]
pub struct BookMetadata {
    pub category_path: Option<String>,
    pub price: Option<i64>,
    pub sale_price: Option<i64>,
    pub published_at: Option<NaiveDate>,
    pub description: Option<String>,
    pub toc: Option<String>,
    pub info_link: Option<String>,
    pub cover_url: Option<String>,
    pub tags: Vec<String>,
}

impl BookMetadata {
    pub fn is_empty(&self) -> bool {
        self.category_path.is_none()
            && self.price.is_none()
            && self.sale_price.is_none()
            && self.published_at.is_none()
            && self.description.is_none()
            && self.toc.is_none()
            && self.info_link.is_none()
            && self.cover_url.is_none()
            && self.tags.is_empty()
    }
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this provider can contribute tag suggestions. The tag-only
    /// pass queries only providers that can.
    fn suggests_tags(&self) -> bool {
        false
    }

    /// Fetch whatever this provider knows about the book. `None` means
    /// "no data" — whether the upstream call failed or came back empty.
    async fn fetch(&self, book: &Book) -> Option<BookMetadata>;
}

/// Drop empty/whitespace strings coming off the wire.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
