use super::schema::Database;
use super::types::{Item, ItemRow, NewItem, StoreError};
use crate::util::now_timestamp;

const ITEM_COLUMNS: &str = "id, blog_id, uid, url, title, content_html, content_text, summary, \
     published, updated, author, photos, categories, fetched_at";

impl Database {
    /// Idempotent item upsert, keyed by `(blog_id, uid)`.
    ///
    /// New uids are inserted; known uids have their mutable fields refreshed
    /// in place (title, content, summary, updated, author, photos,
    /// categories) without counting as additions. Returns the number of rows
    /// actually inserted, so re-fetching unchanged feeds reports zero.
    pub async fn upsert_items(
        &self,
        blog_id: i64,
        items: &[NewItem],
    ) -> Result<usize, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for item in items {
            let photos_json = item
                .photos
                .as_ref()
                .map(|p| serde_json::to_string(p).unwrap_or_else(|_| "[]".to_string()));
            let categories_json =
                serde_json::to_string(&item.categories).unwrap_or_else(|_| "[]".to_string());

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO items
                    (blog_id, uid, url, title, content_html, content_text, summary,
                     published, updated, author, photos, categories, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .bind(blog_id)
            .bind(&item.uid)
            .bind(&item.url)
            .bind(&item.title)
            .bind(&item.content_html)
            .bind(&item.content_text)
            .bind(&item.summary)
            .bind(&item.published)
            .bind(&item.updated)
            .bind(&item.author)
            .bind(&photos_json)
            .bind(&categories_json)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
                continue;
            }

            // Known uid: refresh mutable fields. `published` is identity-ish
            // and left alone so a publisher backdating an entry cannot dodge
            // the retention sweep.
            sqlx::query(
                r#"
                UPDATE items SET
                    url = ?, title = ?, content_html = ?, content_text = ?,
                    summary = ?, updated = ?, author = ?, photos = ?,
                    categories = ?, fetched_at = ?
                WHERE blog_id = ? AND uid = ?
            "#,
            )
            .bind(&item.url)
            .bind(&item.title)
            .bind(&item.content_html)
            .bind(&item.content_text)
            .bind(&item.summary)
            .bind(&item.updated)
            .bind(&item.author)
            .bind(&photos_json)
            .bind(&categories_json)
            .bind(&now)
            .bind(blog_id)
            .bind(&item.uid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Retention sweep: purge items published strictly before the cutoff.
    /// An item published exactly at the cutoff instant is retained. Cutoff
    /// comparison is textual, valid because timestamps are canonical RFC
    /// 3339 UTC and therefore sort chronologically.
    pub async fn delete_items_older_than(&self, cutoff: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM items WHERE published < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Clear all cached items (clear-and-resync). Blogs keep their rows.
    pub async fn delete_all_items(&self) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM items")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    pub async fn count_items(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Items for a locally-fetched blog, newest first.
    pub async fn items_for_blog(&self, blog_id: i64, limit: i64) -> Result<Vec<Item>, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE blog_id = ?
             ORDER BY published DESC
             LIMIT ?"
        ))
        .bind(blog_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemRow::into_item).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::tests_support::item;
    use crate::storage::{Database, NewBlog};

    async fn db_with_blog() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        db.upsert_blog(&NewBlog::plain("https://a.example.com/feed", "A", ""))
            .await
            .unwrap();
        let blog = db
            .find_blog_by_feed_url("https://a.example.com/feed")
            .await
            .unwrap()
            .unwrap();
        (db, blog.id)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (db, blog_id) = db_with_blog().await;
        let items = vec![
            item("uid-1", "2024-06-01T10:00:00Z"),
            item("uid-2", "2024-06-02T10:00:00Z"),
        ];

        let inserted = db.upsert_items(blog_id, &items).await.unwrap();
        assert_eq!(inserted, 2);

        // Same batch again: nothing new
        let inserted = db.upsert_items(blog_id, &items).await.unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(db.count_items().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_mutable_fields() {
        let (db, blog_id) = db_with_blog().await;
        let mut i = item("uid-1", "2024-06-01T10:00:00Z");
        db.upsert_items(blog_id, &[i.clone()]).await.unwrap();

        i.title = "Edited title".to_string();
        i.content_text = "new body".to_string();
        let inserted = db.upsert_items(blog_id, &[i]).await.unwrap();
        assert_eq!(inserted, 0);

        let stored = db.items_for_blog(blog_id, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Edited title");
        assert_eq!(stored[0].content_text, "new body");
    }

    #[tokio::test]
    async fn test_retention_boundary_is_strict() {
        let (db, blog_id) = db_with_blog().await;
        let items = vec![
            item("old", "2024-01-01T00:00:00Z"),
            item("boundary", "2024-03-01T00:00:00Z"),
            item("new", "2024-05-01T00:00:00Z"),
        ];
        db.upsert_items(blog_id, &items).await.unwrap();

        let deleted = db
            .delete_items_older_than("2024-03-01T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = db.items_for_blog(blog_id, 10).await.unwrap();
        let uids: Vec<&str> = remaining.iter().map(|i| i.uid.as_str()).collect();
        assert_eq!(uids, vec!["new", "boundary"]);
    }

    #[tokio::test]
    async fn test_future_dated_items_survive_sweep() {
        let (db, blog_id) = db_with_blog().await;
        db.upsert_items(blog_id, &[item("future", "2099-01-01T00:00:00Z")])
            .await
            .unwrap();

        let deleted = db
            .delete_items_older_than("2024-03-01T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(db.count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_uid_under_different_blogs() {
        let (db, blog_a) = db_with_blog().await;
        db.upsert_blog(&NewBlog::plain("https://b.example.com/feed", "B", ""))
            .await
            .unwrap();
        let blog_b = db
            .find_blog_by_feed_url("https://b.example.com/feed")
            .await
            .unwrap()
            .unwrap()
            .id;

        db.upsert_items(blog_a, &[item("shared", "2024-06-01T00:00:00Z")])
            .await
            .unwrap();
        let inserted = db
            .upsert_items(blog_b, &[item("shared", "2024-06-01T00:00:00Z")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(db.count_items().await.unwrap(), 2);
    }
}
