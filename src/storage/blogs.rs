use std::collections::HashSet;

use super::schema::Database;
use super::types::{Blog, BlogRow, BlogStatus, BlogUpsert, NewBlog, StoreError};
use crate::util::now_timestamp;

const BLOG_COLUMNS: &str = "id, feed_url, title, description, site_url, feed_type, category, \
     tags, icon, author, status, last_fetched_at, last_error, item_count, pinned, hidden, \
     notes, provenance, source_id, foreign_feed_id, foreign_channel, skip_item_fetch, \
     created_at, updated_at";

impl Database {
    /// Reconciling upsert for a candidate blog, keyed by feed URL.
    ///
    /// Exactly one non-deleted blog may exist per feed URL. Three outcomes:
    ///
    /// - no row with this URL: insert, with operator-owned fields at their
    ///   defaults → [`BlogUpsert::Inserted`]
    /// - a tombstone (`deleted`) owns this URL: no-op, automated sync must
    ///   never resurrect an operator-deleted blog → [`BlogUpsert::SkippedDeleted`]
    /// - a live row exists: overwrite sync-owned fields only (title, site
    ///   URL, category, feed type), leaving
    ///   description/tags/notes/pinned/hidden/counters untouched →
    ///   [`BlogUpsert::Updated`]
    ///
    /// Provenance identifies the adapter that created the row and is fixed
    /// at insert. A manually-added blog (provenance NULL) whose feed URL
    /// later shows up in a source's document gets its feed metadata
    /// refreshed but is never claimed: provenance, source id, mirror
    /// references, the skip flag and status stay the operator's.
    ///
    /// Mirror candidates additionally carry the foreign feed's own status
    /// and last-fetch timestamp, which overwrite an adapter-owned row's;
    /// non-mirror candidates leave status alone.
    pub async fn upsert_blog(&self, candidate: &NewBlog) -> Result<BlogUpsert, StoreError> {
        let existing: Vec<(i64, String, Option<String>)> =
            sqlx::query_as("SELECT id, status, provenance FROM blogs WHERE feed_url = ?")
                .bind(&candidate.feed_url)
                .fetch_all(&self.pool)
                .await?;

        if existing
            .iter()
            .any(|(_, status, _)| BlogStatus::parse(status) == BlogStatus::Deleted)
        {
            tracing::debug!(feed_url = %candidate.feed_url, "Skipping upsert over soft-deleted blog");
            return Ok(BlogUpsert::SkippedDeleted);
        }

        let now = now_timestamp();

        if let Some((id, _, existing_provenance)) = existing.first() {
            if existing_provenance.is_none() {
                // Manual row: refresh feed metadata, never ownership
                sqlx::query(
                    r#"
                    UPDATE blogs SET
                        title = ?,
                        site_url = ?,
                        feed_type = ?,
                        category = ?,
                        icon = COALESCE(?, icon),
                        updated_at = ?
                    WHERE id = ?
                "#,
                )
                .bind(&candidate.title)
                .bind(&candidate.site_url)
                .bind(&candidate.feed_type)
                .bind(&candidate.category)
                .bind(&candidate.icon)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;

                return Ok(BlogUpsert::Updated);
            }

            sqlx::query(
                r#"
                UPDATE blogs SET
                    title = ?,
                    site_url = ?,
                    feed_type = ?,
                    category = ?,
                    icon = COALESCE(?, icon),
                    provenance = ?,
                    source_id = ?,
                    foreign_feed_id = ?,
                    foreign_channel = ?,
                    skip_item_fetch = ?,
                    status = COALESCE(?, status),
                    last_fetched_at = COALESCE(?, last_fetched_at),
                    updated_at = ?
                WHERE id = ?
            "#,
            )
            .bind(&candidate.title)
            .bind(&candidate.site_url)
            .bind(&candidate.feed_type)
            .bind(&candidate.category)
            .bind(&candidate.icon)
            .bind(&candidate.provenance)
            .bind(candidate.source_id)
            .bind(&candidate.foreign_feed_id)
            .bind(&candidate.foreign_channel)
            .bind(candidate.skip_item_fetch)
            .bind(candidate.mirrored_status.map(|s| s.as_str()))
            .bind(&candidate.mirrored_last_fetched_at)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

            return Ok(BlogUpsert::Updated);
        }

        let status = candidate.mirrored_status.unwrap_or(BlogStatus::Active);
        sqlx::query(
            r#"
            INSERT INTO blogs (feed_url, title, site_url, feed_type, category, icon,
                               status, last_fetched_at, provenance, source_id,
                               foreign_feed_id, foreign_channel, skip_item_fetch,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&candidate.feed_url)
        .bind(&candidate.title)
        .bind(&candidate.site_url)
        .bind(&candidate.feed_type)
        .bind(&candidate.category)
        .bind(&candidate.icon)
        .bind(status.as_str())
        .bind(&candidate.mirrored_last_fetched_at)
        .bind(&candidate.provenance)
        .bind(candidate.source_id)
        .bind(&candidate.foreign_feed_id)
        .bind(&candidate.foreign_channel)
        .bind(candidate.skip_item_fetch)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(BlogUpsert::Inserted)
    }

    pub async fn find_blog_by_feed_url(&self, feed_url: &str) -> Result<Option<Blog>, StoreError> {
        let row: Option<BlogRow> = sqlx::query_as(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE feed_url = ? AND status != 'deleted'"
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BlogRow::into_blog))
    }

    /// Blogs eligible for the item-sync stage: non-hidden, not soft-deleted,
    /// bounded page size. Mirror/skip-flagged blogs are included; the
    /// scheduler counts them as skipped rather than silently dropping them.
    pub async fn list_syncable_blogs(&self, page_size: i64) -> Result<Vec<Blog>, StoreError> {
        let rows: Vec<BlogRow> = sqlx::query_as(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs
             WHERE hidden = 0 AND status != 'deleted'
             ORDER BY id
             LIMIT ?"
        ))
        .bind(page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BlogRow::into_blog).collect())
    }

    /// Record a failed fetch on the blog's own row, inspectable without logs.
    pub async fn set_blog_error(&self, blog_id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE blogs SET status = 'error', last_error = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(now_timestamp())
            .bind(blog_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Complete a successful blog refresh: clear the error, mark active,
    /// stamp last-fetch, and refresh the cached item count. One transaction
    /// so a failure leaves the previous consistent state.
    pub async fn complete_blog_refresh(&self, blog_id: i64) -> Result<(), StoreError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE blogs SET
                status = 'active',
                last_error = NULL,
                last_fetched_at = ?,
                updated_at = ?,
                item_count = (SELECT COUNT(*) FROM items WHERE blog_id = blogs.id)
            WHERE id = ?
        "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(blog_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Operator deletion: the row persists as a tombstone (status `deleted`,
    /// hidden) so automated sync cannot re-create the feed URL; owned items
    /// are cascade-deleted now.
    pub async fn soft_delete_blog(&self, blog_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM items WHERE blog_id = ?")
            .bind(blog_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE blogs SET status = 'deleted', hidden = 1, item_count = 0, updated_at = ? WHERE id = ?",
        )
        .bind(now_timestamp())
        .bind(blog_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Mark a blog inactive (webhook unsubscribe). Items and metadata are
    /// preserved; only mirror-provenance rows are touched, manual entries
    /// stay as the operator left them.
    pub async fn mark_blog_inactive(&self, feed_url: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE blogs SET status = 'inactive', updated_at = ?
            WHERE feed_url = ? AND provenance IS NOT NULL AND status != 'deleted'
        "#,
        )
        .bind(now_timestamp())
        .bind(feed_url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reactivate an inactive mirror blog (webhook re-subscribe).
    pub async fn reactivate_blog(&self, blog_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE blogs SET status = 'active', last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now_timestamp())
        .bind(blog_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Orphan detection for the mirror adapter: soft-delete every blog under
    /// this source whose foreign feed id is no longer present in the current
    /// foreign feed set. Returns the number of blogs tombstoned.
    pub async fn soft_delete_orphaned_mirror_blogs(
        &self,
        source_id: i64,
        live_foreign_ids: &HashSet<String>,
    ) -> Result<usize, StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, foreign_feed_id FROM blogs
            WHERE source_id = ? AND foreign_feed_id IS NOT NULL AND status != 'deleted'
        "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        let mut orphaned = 0;
        for (id, foreign_id) in rows {
            if !live_foreign_ids.contains(&foreign_id) {
                tracing::info!(
                    blog_id = id,
                    foreign_feed_id = %foreign_id,
                    "Mirror blog no longer present upstream, soft-deleting"
                );
                self.soft_delete_blog(id).await?;
                orphaned += 1;
            }
        }

        Ok(orphaned)
    }

    /// Reset every non-deleted blog to a clean active state. Used by
    /// clear-and-resync to recover from corrupted cached content without
    /// losing configuration.
    pub async fn reset_blogs_for_resync(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE blogs SET
                status = 'active',
                last_error = NULL,
                last_fetched_at = NULL,
                item_count = 0,
                updated_at = ?
            WHERE status != 'deleted'
        "#,
        )
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count of non-deleted blogs.
    pub async fn count_blogs(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blogs WHERE status != 'deleted'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// All non-deleted blogs, for the subscription-list export.
    pub async fn list_all_blogs(&self) -> Result<Vec<Blog>, StoreError> {
        let rows: Vec<BlogRow> = sqlx::query_as(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE status != 'deleted' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BlogRow::into_blog).collect())
    }
}
