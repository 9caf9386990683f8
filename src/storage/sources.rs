use anyhow::Result;

use super::schema::Database;
use super::types::{NewSource, Source, SourceRow, StoreError};
use crate::util::now_timestamp;

impl Database {
    /// Insert a configured source. Operator-facing; the sync engine itself
    /// never creates sources.
    pub async fn create_source(&self, source: &NewSource) -> Result<i64, StoreError> {
        let kind = source
            .kind
            .ok_or_else(|| StoreError::NotFound("source kind".into()))?;
        let result = sqlx::query(
            r#"
            INSERT INTO sources (kind, url, inline_document, remote_instance, remote_account,
                                 category_filter, enabled, sync_interval_minutes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
        )
        .bind(kind.as_str())
        .bind(&source.url)
        .bind(&source.inline_document)
        .bind(&source.remote_instance)
        .bind(&source.remote_account)
        .bind(&source.category_filter)
        .bind(if source.sync_interval_minutes > 0 {
            source.sync_interval_minutes
        } else {
            60
        })
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All enabled sources of kinds the engine recognizes, in insertion
    /// order. Rows whose kind string is unknown (written by a newer version,
    /// say) are skipped rather than failing the enumeration.
    pub async fn list_enabled_sources(&self) -> Result<Vec<Source>, StoreError> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT id, kind, url, inline_document, remote_instance, remote_account,
                   category_filter, enabled, sync_interval_minutes, last_synced_at,
                   last_sync_error, created_at
            FROM sources
            WHERE enabled = 1
            ORDER BY id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(SourceRow::into_source).collect())
    }

    pub async fn get_source(&self, id: i64) -> Result<Source, StoreError> {
        let row: Option<SourceRow> = sqlx::query_as(
            r#"
            SELECT id, kind, url, inline_document, remote_instance, remote_account,
                   category_filter, enabled, sync_interval_minutes, last_synced_at,
                   last_sync_error, created_at
            FROM sources
            WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.and_then(SourceRow::into_source)
            .ok_or_else(|| StoreError::NotFound(format!("source {}", id)))
    }

    /// Record the outcome of a sync attempt on the source's own row.
    /// Called win or lose, so operators can inspect status without logs.
    pub async fn record_source_sync(
        &self,
        source_id: i64,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sources SET last_synced_at = ?, last_sync_error = ? WHERE id = ?")
            .bind(now_timestamp())
            .bind(error)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a source and cascade to its owned blogs and their items.
    ///
    /// The store has no foreign key from blogs to sources (blogs from a gone
    /// source are legitimate orphan rows), so the cascade is explicit and
    /// transactional here.
    pub async fn delete_source(&self, source_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM items WHERE blog_id IN (SELECT id FROM blogs WHERE source_id = ?)")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM blogs WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewSource, SourceKind};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn list_source(url: &str) -> NewSource {
        NewSource {
            kind: Some(SourceKind::ListUrl),
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_list_sources() {
        let db = test_db().await;
        let id = db
            .create_source(&list_source("https://example.com/list.opml"))
            .await
            .unwrap();
        assert!(id > 0);

        let sources = db.list_enabled_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, SourceKind::ListUrl);
        assert!(sources[0].last_synced_at.is_none());
    }

    #[tokio::test]
    async fn test_record_source_sync_sets_status() {
        let db = test_db().await;
        let id = db
            .create_source(&list_source("https://example.com/list.opml"))
            .await
            .unwrap();

        db.record_source_sync(id, Some("fetch failed")).await.unwrap();
        let source = db.get_source(id).await.unwrap();
        assert!(source.last_synced_at.is_some());
        assert_eq!(source.last_sync_error.as_deref(), Some("fetch failed"));

        db.record_source_sync(id, None).await.unwrap();
        let source = db.get_source(id).await.unwrap();
        assert!(source.last_sync_error.is_none());
    }

    #[tokio::test]
    async fn test_delete_source_cascades() {
        let db = test_db().await;
        let id = db
            .create_source(&list_source("https://example.com/list.opml"))
            .await
            .unwrap();

        let mut blog = crate::storage::NewBlog::plain("https://a.example.com/feed", "A", "");
        blog.source_id = Some(id);
        blog.provenance = Some("list".to_string());
        db.upsert_blog(&blog).await.unwrap();

        db.delete_source(id).await.unwrap();

        assert!(db.get_source(id).await.is_err());
        assert!(db
            .find_blog_by_feed_url("https://a.example.com/feed")
            .await
            .unwrap()
            .is_none());
    }
}
