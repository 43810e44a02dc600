//! Fill-if-missing merge rules and taxonomy normalization.
//!
//! The merge is an explicit ordered rule table: each rule names a field,
//! says when the record's current value counts as empty, and writes the
//! provider value. A field is written at most once per pass, by the first
//! provider that has it; existing data is never overwritten.

use crate::models::{truncate_chars, Book, CATEGORY_NAME_MAX, TAG_NAME_MAX};
use crate::providers::BookMetadata;

pub(crate) struct FieldRule {
    pub name: &'static str,
    pub is_empty: fn(&Book) -> bool,
    /// Returns true when a value was written.
    pub apply: fn(&mut Book, &BookMetadata) -> bool,
}

pub(crate) fn field_rules() -> Vec<FieldRule> {
    vec![
        FieldRule {
            name: "description",
            is_empty: |b| is_blank(&b.description),
            apply: |b, m| fill_text(&mut b.description, &m.description),
        },
        FieldRule {
            name: "toc",
            is_empty: |b| is_blank(&b.toc),
            apply: |b, m| fill_text(&mut b.toc, &m.toc),
        },
        FieldRule {
            name: "info_link",
            is_empty: |b| is_blank(&b.info_link),
            apply: |b, m| fill_text(&mut b.info_link, &m.info_link),
        },
        FieldRule {
            // The price pair fills together: a provider's sale price is only
            // trusted alongside its standard price.
            name: "price",
            is_empty: |b| b.price <= 0,
            apply: |b, m| {
                let Some(price) = m.price.filter(|p| *p > 0) else {
                    return false;
                };
                b.price = price;
                if b.sale_price <= 0 {
                    b.sale_price = m.sale_price.filter(|p| *p > 0).unwrap_or(price);
                }
                true
            },
        },
        FieldRule {
            name: "published_at",
            is_empty: |b| b.published_at.is_none(),
            apply: |b, m| {
                if let Some(date) = m.published_at {
                    b.published_at = Some(date);
                    true
                } else {
                    false
                }
            },
        },
    ]
}

/// Apply every rule once, in order, across providers in their configured
/// order. Returns the names of the fields that changed.
pub(crate) fn merge_metadata(book: &mut Book, metas: &[BookMetadata]) -> Vec<&'static str> {
    let mut changed = Vec::new();
    for rule in field_rules() {
        if !(rule.is_empty)(book) {
            continue;
        }
        for meta in metas {
            if (rule.apply)(book, meta) {
                changed.push(rule.name);
                break;
            }
        }
    }
    changed
}

pub(crate) fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn fill_text(dst: &mut Option<String>, src: &Option<String>) -> bool {
    match src.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => {
            *dst = Some(text.to_string());
            true
        }
        None => false,
    }
}

/// Split a `>`-delimited category path into trimmed, truncated segments.
pub(crate) fn parse_category_path(path: &str) -> Vec<String> {
    path.split('>')
        .map(|s| truncate_chars(s.trim(), CATEGORY_NAME_MAX))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Normalize one raw tag: trim, strip a leading `#`, truncate. `None` when
/// nothing is left.
pub(crate) fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#').trim();
    if tag.is_empty() {
        None
    } else {
        Some(truncate_chars(tag, TAG_NAME_MAX))
    }
}

/// Normalize and deduplicate (exact string match), preserving first-seen
/// order.
pub(crate) fn normalize_tags<I: IntoIterator<Item = String>>(raw: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .filter_map(|t| normalize_tag(&t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookStatus;

    fn bare_book() -> Book {
        Book {
            id: 1,
            isbn: "9788900000000".into(),
            title: "제목".into(),
            description: None,
            toc: None,
            info_link: None,
            price: 0,
            sale_price: 0,
            published_at: None,
            status: BookStatus::OnSale,
            stock: 0,
            enriched_at: None,
            empty_passes: 0,
        }
    }

    #[test]
    fn fills_only_missing_fields() {
        let mut book = bare_book();
        book.description = Some("user wrote this".into());

        let meta = BookMetadata {
            description: Some("provider text".into()),
            price: Some(15000),
            sale_price: Some(13500),
            ..Default::default()
        };

        let changed = merge_metadata(&mut book, &[meta]);
        assert_eq!(changed, vec!["price"]);
        assert_eq!(book.description.as_deref(), Some("user wrote this"));
        assert_eq!(book.price, 15000);
        assert_eq!(book.sale_price, 13500);
    }

    #[test]
    fn null_description_is_filled() {
        let mut book = bare_book();
        let meta = BookMetadata {
            description: Some("provider text".into()),
            ..Default::default()
        };
        let changed = merge_metadata(&mut book, &[meta]);
        assert_eq!(changed, vec!["description"]);
        assert_eq!(book.description.as_deref(), Some("provider text"));
    }

    #[test]
    fn first_provider_with_data_wins() {
        let mut book = bare_book();
        let first = BookMetadata {
            description: Some("first".into()),
            ..Default::default()
        };
        let second = BookMetadata {
            description: Some("second".into()),
            price: Some(9000),
            ..Default::default()
        };

        merge_metadata(&mut book, &[first, second]);
        assert_eq!(book.description.as_deref(), Some("first"));
        assert_eq!(book.price, 9000);
    }

    #[test]
    fn merge_is_idempotent_on_filled_record() {
        let mut book = bare_book();
        let meta = BookMetadata {
            description: Some("text".into()),
            price: Some(10000),
            published_at: chrono::NaiveDate::from_ymd_opt(2021, 3, 1),
            ..Default::default()
        };

        assert!(!merge_metadata(&mut book, std::slice::from_ref(&meta)).is_empty());
        assert!(merge_metadata(&mut book, std::slice::from_ref(&meta)).is_empty());
    }

    #[test]
    fn sale_price_falls_back_to_standard() {
        let mut book = bare_book();
        let meta = BookMetadata {
            price: Some(12000),
            ..Default::default()
        };
        merge_metadata(&mut book, &[meta]);
        assert_eq!(book.sale_price, 12000);
    }

    #[test]
    fn category_path_splits_and_trims() {
        assert_eq!(
            parse_category_path("국내도서 > 소설 > 한국소설"),
            vec!["국내도서", "소설", "한국소설"]
        );
        assert_eq!(parse_category_path(" > >소설> "), vec!["소설"]);
        assert!(parse_category_path("").is_empty());
    }

    #[test]
    fn tags_deduplicate_after_normalization() {
        let raw = vec!["#소설".to_string(), "소설".to_string(), " 소설 ".to_string()];
        assert_eq!(normalize_tags(raw), vec!["소설"]);
    }

    #[test]
    fn tag_normalization_truncates() {
        let long = "a".repeat(80);
        assert_eq!(normalize_tag(&long).unwrap().len(), TAG_NAME_MAX);
        assert_eq!(normalize_tag("##"), None);
        assert_eq!(normalize_tag("  "), None);
    }
}
