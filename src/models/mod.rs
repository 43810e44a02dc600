//! Domain records: books, taxonomy entities and the search-sync instruction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Category names are truncated to this many characters before lookup or
/// creation, matching the column limit of the primary store.
pub const CATEGORY_NAME_MAX: usize = 50;

/// Tag names are truncated to this many characters on creation.
pub const TAG_NAME_MAX: usize = 30;

/// Truncate by character count, not bytes — names are frequently CJK.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Sale status. A book is exactly one of these at any time; UNAVAILABLE marks
/// records no upstream provider knows about, so the scheduler stops retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookStatus {
    #[sqlx(rename = "ON_SALE")]
    OnSale,
    #[sqlx(rename = "SOLD_OUT")]
    SoldOut,
    #[sqlx(rename = "UNAVAILABLE")]
    Unavailable,
}

/// Flat book record. Category, tag and image links live in their own tables
/// and are loaded separately where needed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Book {
    pub id: i64,
    pub isbn: String,
    pub title: String,
    pub description: Option<String>,
    pub toc: Option<String>,
    pub info_link: Option<String>,
    pub price: i64,
    pub sale_price: i64,
    pub published_at: Option<NaiveDate>,
    pub status: BookStatus,
    pub stock: i64,
    /// Set on the first enrichment pass that wrote anything.
    pub enriched_at: Option<DateTime<Utc>>,
    /// Consecutive passes where every provider came back empty.
    pub empty_passes: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// Projection of a book into the search index, keyed by book id so repeated
/// upserts converge to the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDocument {
    pub id: i64,
    pub isbn: String,
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
    pub sale_price: i64,
    pub published_at: Option<NaiveDate>,
    pub status: BookStatus,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
}

/// Which index-affecting entity a sync instruction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncTarget {
    Category,
    Tag,
}

/// Wire payload of the search-sync channel: `{"targetId": …, "type": …}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInstruction {
    #[serde(rename = "targetId")]
    pub target_id: i64,
    #[serde(rename = "type")]
    pub kind: SyncTarget,
}

impl SyncInstruction {
    pub fn category(target_id: i64) -> Self {
        Self {
            target_id,
            kind: SyncTarget::Category,
        }
    }

    pub fn tag(target_id: i64) -> Self {
        Self {
            target_id,
            kind: SyncTarget::Tag,
        }
    }
}
