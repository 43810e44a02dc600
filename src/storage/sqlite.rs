//! SQLite-backed primary store: book lookups the enrichment and sync
//! subsystems depend on, plus taxonomy upserts and the index projection.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::models::{
    truncate_chars, Book, BookDocument, Category, Tag, CATEGORY_NAME_MAX, TAG_NAME_MAX,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

const BOOK_COLUMNS: &str = "id, isbn, title, description, toc, info_link, price, sale_price, \
                            published_at, status, stock, enriched_at, empty_passes";

fn prefixed_book_columns(prefix: &str) -> String {
    BOOK_COLUMNS
        .split(", ")
        .map(|c| format!("{prefix}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Primary catalog store. Cheap to clone — wraps a connection pool.
#[derive(Clone)]
pub struct CatalogStorage {
    pool: SqlitePool,
}

// Several methods here form the collaborator contract consumed by the CRUD
// layer (save, insert, single-entity lookups). Not all of them are called by
// the daemon loops themselves.
#[allow(dead_code)]
impl CatalogStorage {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let connection_string = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&connection_string)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("catalog migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // === Book reads ===

    pub async fn find_book(&self, id: i64) -> Result<Option<Book>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?");
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Books with at least one core metadata field still empty. Drives the
    /// frequent backfill job.
    pub async fn find_missing_enrichment(&self, limit: i64) -> Result<Vec<Book>> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books \
             WHERE status != 'UNAVAILABLE' \
               AND (description IS NULL OR description = '' \
                    OR price <= 0 OR published_at IS NULL) \
             ORDER BY id LIMIT ?"
        );
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Books with no tag links at all. Drives the slower tagging job.
    pub async fn find_missing_tags(&self, limit: i64) -> Result<Vec<Book>> {
        let cols = prefixed_book_columns("b");
        let sql = format!(
            "SELECT {cols} FROM books b \
             WHERE b.status != 'UNAVAILABLE' \
               AND NOT EXISTS (SELECT 1 FROM book_tags bt WHERE bt.book_id = b.id) \
             ORDER BY b.id LIMIT ?"
        );
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Page of books linked to any of the given categories. Offset-paged;
    /// callers loop until an empty page comes back.
    pub async fn find_by_category_ids(
        &self,
        category_ids: &[i64],
        page: i64,
        page_size: i64,
    ) -> Result<Vec<Book>> {
        if category_ids.is_empty() {
            return Ok(Vec::new());
        }
        let cols = prefixed_book_columns("b");
        let placeholders = vec!["?"; category_ids.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT {cols} FROM books b \
             JOIN book_categories bc ON bc.book_id = b.id \
             WHERE bc.category_id IN ({placeholders}) \
             ORDER BY b.id LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query_as::<_, Book>(&sql);
        for id in category_ids {
            query = query.bind(id);
        }
        Ok(query
            .bind(page_size)
            .bind(page * page_size)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn find_by_tag_id(
        &self,
        tag_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<Book>> {
        let cols = prefixed_book_columns("b");
        let sql = format!(
            "SELECT {cols} FROM books b \
             JOIN book_tags bt ON bt.book_id = b.id \
             WHERE bt.tag_id = ? \
             ORDER BY b.id LIMIT ? OFFSET ?"
        );
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(tag_id)
            .bind(page_size)
            .bind(page * page_size)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Cursor page: books with id strictly greater than the watermark.
    /// Insensitive to concurrent inserts below the cursor.
    pub async fn find_all_after_id(&self, cursor: i64, page_size: i64) -> Result<Vec<Book>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id > ? ORDER BY id LIMIT ?");
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(cursor)
            .bind(page_size)
            .fetch_all(&self.pool)
            .await?)
    }

    // === Book writes ===

    pub async fn insert_book(&self, isbn: &str, title: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO books (isbn, title) VALUES (?, ?)")
            .bind(isbn)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Persist the enrichable fields after a merge pass and stamp the record
    /// as enriched. Resets the empty-pass counter.
    ///
    /// The merge runs against a snapshot taken before the provider round-trip,
    /// so each field re-checks emptiness at write time: a value written by
    /// someone else while the providers were in flight wins over the merge.
    pub async fn save_enriched(&self, book: &Book) -> Result<()> {
        sqlx::query(
            "UPDATE books SET \
             description = CASE WHEN description IS NULL OR description = '' \
                 THEN ?1 ELSE description END, \
             toc = CASE WHEN toc IS NULL OR toc = '' THEN ?2 ELSE toc END, \
             info_link = CASE WHEN info_link IS NULL OR info_link = '' \
                 THEN ?3 ELSE info_link END, \
             price = CASE WHEN price <= 0 THEN ?4 ELSE price END, \
             sale_price = CASE WHEN sale_price <= 0 THEN ?5 ELSE sale_price END, \
             published_at = COALESCE(published_at, ?6), \
             enriched_at = ?7, empty_passes = 0 \
             WHERE id = ?8",
        )
        .bind(&book.description)
        .bind(&book.toc)
        .bind(&book.info_link)
        .bind(book.price)
        .bind(book.sale_price)
        .bind(book.published_at)
        .bind(chrono::Utc::now())
        .bind(book.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one more all-providers-empty pass; returns the new count.
    pub async fn bump_empty_passes(&self, book_id: i64) -> Result<i64> {
        sqlx::query("UPDATE books SET empty_passes = empty_passes + 1 WHERE id = ?")
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT empty_passes FROM books WHERE id = ?")
                .bind(book_id)
                .fetch_optional(&self.pool)
                .await?
                .unwrap_or(0),
        )
    }

    pub async fn mark_unavailable(&self, book_id: i64) -> Result<()> {
        sqlx::query("UPDATE books SET status = 'UNAVAILABLE' WHERE id = ?")
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === Taxonomy ===

    /// Find or create a category node under the given parent. Lookup is by
    /// (trimmed, truncated name, parent) with a NULL-safe parent match.
    /// Race-safe: two workers resolving the same new segment converge on one
    /// row, the loser reuses the winner's insert.
    pub async fn ensure_category(&self, name: &str, parent_id: Option<i64>) -> Result<i64> {
        let name = truncate_chars(name.trim(), CATEGORY_NAME_MAX);

        let result =
            sqlx::query("INSERT OR IGNORE INTO categories (name, parent_id) VALUES (?, ?)")
                .bind(&name)
                .bind(parent_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() > 0 {
            return Ok(result.last_insert_rowid());
        }

        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT id FROM categories WHERE name = ? AND parent_id IS ?",
        )
        .bind(&name)
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Find or create a tag by exact name (already normalized by the caller).
    pub async fn ensure_tag(&self, name: &str) -> Result<i64> {
        let name = truncate_chars(name, TAG_NAME_MAX);

        let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM tags WHERE name = ?")
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let result = sqlx::query("INSERT INTO tags (name) VALUES (?)")
            .bind(&name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Link a book to a category. Returns true only when a new row was
    /// written; re-linking an existing pair is a no-op.
    pub async fn link_category(&self, book_id: i64, category_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO book_categories (book_id, category_id) VALUES (?, ?)",
        )
        .bind(book_id)
        .bind(category_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn link_tag(&self, book_id: i64, tag_id: i64) -> Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO book_tags (book_id, tag_id) VALUES (?, ?)")
                .bind(book_id)
                .bind(tag_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn has_images(&self, book_id: i64) -> Result<bool> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM book_images WHERE book_id = ?")
                .bind(book_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    pub async fn add_image(&self, book_id: i64, url: &str, position: i64) -> Result<()> {
        sqlx::query("INSERT INTO book_images (book_id, url, position) VALUES (?, ?, ?)")
            .bind(book_id)
            .bind(url)
            .bind(position)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Descendant closure of a category: the node itself plus all recursive
    /// children. Empty when the category does not exist.
    pub async fn category_subtree(&self, root_id: i64) -> Result<Vec<i64>> {
        Ok(sqlx::query_scalar::<_, i64>(
            "WITH RECURSIVE subtree(id) AS ( \
                 SELECT id FROM categories WHERE id = ? \
                 UNION ALL \
                 SELECT c.id FROM categories c JOIN subtree s ON c.parent_id = s.id \
             ) SELECT id FROM subtree",
        )
        .bind(root_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn find_category(&self, id: i64) -> Result<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>(
            "SELECT id, name, parent_id FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_tag(&self, id: i64) -> Result<Option<Tag>> {
        Ok(sqlx::query_as::<_, Tag>("SELECT id, name FROM tags WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // === Rename operations (transactional) ===

    pub async fn category_name_tx(
        tx: &mut Transaction<'static, Sqlite>,
        id: i64,
    ) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT name FROM categories WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?,
        )
    }

    pub async fn set_category_name_tx(
        tx: &mut Transaction<'static, Sqlite>,
        id: i64,
        name: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE categories SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn tag_name_tx(
        tx: &mut Transaction<'static, Sqlite>,
        id: i64,
    ) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT name FROM tags WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?,
        )
    }

    pub async fn set_tag_name_tx(
        tx: &mut Transaction<'static, Sqlite>,
        id: i64,
        name: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE tags SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // === Index projection ===

    /// Assemble the search document for a book: the flat record plus its
    /// category names, tag names and primary cover.
    pub async fn book_document(&self, book_id: i64) -> Result<Option<BookDocument>> {
        let Some(book) = self.find_book(book_id).await? else {
            return Ok(None);
        };

        let categories = sqlx::query_scalar::<_, String>(
            "SELECT c.name FROM categories c \
             JOIN book_categories bc ON bc.category_id = c.id \
             WHERE bc.book_id = ? ORDER BY c.name",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        let tags = sqlx::query_scalar::<_, String>(
            "SELECT t.name FROM tags t \
             JOIN book_tags bt ON bt.tag_id = t.id \
             WHERE bt.book_id = ? ORDER BY t.name",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        let cover_url = sqlx::query_scalar::<_, String>(
            "SELECT url FROM book_images WHERE book_id = ? ORDER BY position LIMIT 1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(BookDocument {
            id: book.id,
            isbn: book.isbn,
            title: book.title,
            description: book.description,
            price: book.price,
            sale_price: book.sale_price,
            published_at: book.published_at,
            status: book.status,
            categories,
            tags,
            cover_url,
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::CatalogStorage;

    /// Fresh migrated store on a temp file. Keep the TempDir alive for the
    /// duration of the test.
    pub(crate) async fn storage() -> (CatalogStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let storage = CatalogStorage::new(path.to_str().unwrap()).await.unwrap();
        storage.migrate().await.unwrap();
        (storage, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::storage;

    #[tokio::test]
    async fn link_pair_is_unique() {
        let (s, _dir) = storage().await;
        let book = s.insert_book("9780000000001", "Book").await.unwrap();
        let cat = s.ensure_category("fiction", None).await.unwrap();

        assert!(s.link_category(book, cat).await.unwrap());
        assert!(!s.link_category(book, cat).await.unwrap());

        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM book_categories")
            .fetch_one(s.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn ensure_category_is_scoped_by_parent() {
        let (s, _dir) = storage().await;
        let root = s.ensure_category("소설", None).await.unwrap();
        let child = s.ensure_category("소설", Some(root)).await.unwrap();
        assert_ne!(root, child);

        // Same (name, parent) pair resolves to the existing node.
        assert_eq!(s.ensure_category(" 소설 ", None).await.unwrap(), root);
        assert_eq!(s.ensure_category("소설", Some(root)).await.unwrap(), child);
    }

    #[tokio::test]
    async fn concurrent_root_categories_collapse_to_one_row() {
        let (s, _dir) = storage().await;

        let (a, b) = tokio::join!(
            tokio::spawn({
                let s = s.clone();
                async move { s.ensure_category("국내도서", None).await.unwrap() }
            }),
            tokio::spawn({
                let s = s.clone();
                async move { s.ensure_category("국내도서", None).await.unwrap() }
            }),
        );
        assert_eq!(a.unwrap(), b.unwrap());

        // The schema itself rejects a duplicate NULL-parent row.
        let raw = sqlx::query("INSERT INTO categories (name, parent_id) VALUES ('국내도서', NULL)")
            .execute(s.pool())
            .await;
        assert!(raw.is_err());

        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM categories")
            .fetch_one(s.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn subtree_closure_is_recursive() {
        let (s, _dir) = storage().await;
        let root = s.ensure_category("root", None).await.unwrap();
        let child = s.ensure_category("child", Some(root)).await.unwrap();
        let grandchild = s.ensure_category("grandchild", Some(child)).await.unwrap();
        let _other = s.ensure_category("other", None).await.unwrap();

        let mut ids = s.category_subtree(root).await.unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![root, child, grandchild]);

        assert!(s.category_subtree(9999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cursor_pagination_visits_each_id_once() {
        let (s, _dir) = storage().await;
        for i in 0..25 {
            s.insert_book(&format!("isbn-{i:03}"), "t").await.unwrap();
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = s.find_all_after_id(cursor, 10).await.unwrap();
            if page.is_empty() {
                break;
            }
            pages += 1;
            cursor = page.last().unwrap().id;
            seen.extend(page.into_iter().map(|b| b.id));
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn missing_enrichment_excludes_unavailable() {
        let (s, _dir) = storage().await;
        let a = s.insert_book("isbn-a", "A").await.unwrap();
        let b = s.insert_book("isbn-b", "B").await.unwrap();
        s.mark_unavailable(b).await.unwrap();

        let candidates = s.find_missing_enrichment(10).await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![a]);
    }
}
