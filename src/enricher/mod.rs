//! Enrichment engine: merges provider metadata into a book record under
//! fill-if-missing rules and keeps the search index in step.

pub mod merge;
pub mod service;

use std::sync::Arc;

use crate::index::SearchIndex;
use crate::providers::MetadataProvider;
use crate::storage::CatalogStorage;

pub use service::{EnrichService, EnrichTask};

pub struct Enricher {
    storage: CatalogStorage,
    index: Arc<dyn SearchIndex>,
    providers: Vec<Arc<dyn MetadataProvider>>,
    /// Consecutive all-providers-empty passes before a never-enriched book
    /// is marked unavailable and dropped from the index.
    empty_pass_threshold: i64,
}

impl Enricher {
    pub fn new(
        storage: CatalogStorage,
        index: Arc<dyn SearchIndex>,
        providers: Vec<Arc<dyn MetadataProvider>>,
        empty_pass_threshold: i64,
    ) -> Self {
        Self {
            storage,
            index,
            providers,
            empty_pass_threshold: empty_pass_threshold.max(1),
        }
    }

    /// Backfill every missing field on one book. Re-running on an already
    /// enriched record performs zero writes. A book deleted between
    /// scheduling and execution is a no-op success.
    pub async fn enrich(&self, book_id: i64) -> anyhow::Result<()> {
        let Some(mut book) = self.storage.find_book(book_id).await? else {
            tracing::debug!(book_id, "book vanished before enrichment, skipping");
            return Ok(());
        };

        let mut metas = Vec::new();
        for provider in &self.providers {
            if let Some(meta) = provider.fetch(&book).await {
                tracing::debug!(provider = provider.name(), book_id, "provider returned data");
                metas.push(meta);
            }
        }

        if metas.is_empty() {
            return self.handle_empty_pass(&book).await;
        }

        let changed_fields = merge::merge_metadata(&mut book, &metas);
        let mut changed = !changed_fields.is_empty();

        // First provider with a category path establishes the chain.
        if let Some(path) = metas.iter().find_map(|m| m.category_path.as_deref()) {
            changed |= self.attach_category_path(book.id, path).await?;
        }

        let tags = merge::normalize_tags(metas.iter().flat_map(|m| m.tags.iter().cloned()));
        changed |= self.attach_tags(book.id, &tags).await?;

        if !self.storage.has_images(book.id).await? {
            if let Some(cover) = metas.iter().find_map(|m| m.cover_url.clone()) {
                self.storage.add_image(book.id, &cover, 0).await?;
                changed = true;
            }
        }

        if !changed {
            tracing::debug!(book_id, "nothing to enrich, skipping save and index");
            return Ok(());
        }

        self.storage.save_enriched(&book).await?;
        if let Some(doc) = self.storage.book_document(book.id).await? {
            self.index.upsert(&doc).await?;
        }
        tracing::info!(book_id, fields = ?changed_fields, "book enriched");
        Ok(())
    }

    /// Tag-only pass for books that have no tags yet. Queries only the
    /// providers that suggest tags; there is nothing to gain from the others.
    pub async fn fill_tags(&self, book_id: i64) -> anyhow::Result<()> {
        let Some(book) = self.storage.find_book(book_id).await? else {
            tracing::debug!(book_id, "book vanished before tagging, skipping");
            return Ok(());
        };

        let mut raw = Vec::new();
        for provider in self.providers.iter().filter(|p| p.suggests_tags()) {
            if let Some(meta) = provider.fetch(&book).await {
                raw.extend(meta.tags);
            }
        }

        let tags = merge::normalize_tags(raw);
        if tags.is_empty() {
            tracing::debug!(book_id, "no tags suggested");
            return Ok(());
        }

        if self.attach_tags(book.id, &tags).await? {
            if let Some(doc) = self.storage.book_document(book.id).await? {
                self.index.upsert(&doc).await?;
            }
            tracing::info!(book_id, count = tags.len(), "tags filled");
        }
        Ok(())
    }

    /// Every provider came back empty. For a record that has never been
    /// enriched this counts toward the unavailability threshold; once
    /// reached, the book is marked unavailable and removed from the index so
    /// the scheduler stops retrying an identifier nobody knows.
    async fn handle_empty_pass(&self, book: &crate::models::Book) -> anyhow::Result<()> {
        if book.enriched_at.is_some() {
            tracing::debug!(book_id = book.id, "providers empty for enriched book, ignoring");
            return Ok(());
        }

        let passes = self.storage.bump_empty_passes(book.id).await?;
        if passes < self.empty_pass_threshold {
            tracing::debug!(book_id = book.id, passes, "no provider data yet");
            return Ok(());
        }

        tracing::warn!(book_id = book.id, isbn = %book.isbn, passes,
            "no provider has data, marking unavailable");
        self.storage.mark_unavailable(book.id).await?;
        self.index.delete(book.id).await?;
        Ok(())
    }

    /// Build/reuse the category chain for a `>`-delimited path and link the
    /// leaf to the book. Returns true when a new link was written.
    async fn attach_category_path(&self, book_id: i64, path: &str) -> anyhow::Result<bool> {
        let segments = merge::parse_category_path(path);
        let mut parent: Option<i64> = None;
        for segment in &segments {
            parent = Some(self.storage.ensure_category(segment, parent).await?);
        }
        match parent {
            Some(leaf) => Ok(self.storage.link_category(book_id, leaf).await?),
            None => Ok(false),
        }
    }

    /// Link normalized tags, creating them as needed. Returns true when at
    /// least one new link was written.
    async fn attach_tags(&self, book_id: i64, tags: &[String]) -> anyhow::Result<bool> {
        let mut changed = false;
        for tag in tags {
            let tag_id = self.storage.ensure_tag(tag).await?;
            changed |= self.storage.link_tag(book_id, tag_id).await?;
        }
        Ok(changed)
    }
}
