use super::schema::Database;
use super::types::{RunStats, StoreError};

impl Database {
    /// Overwrite the single run-stats record with the latest run's outcome.
    /// History is not kept; `started_at` tells the operator how stale the
    /// record is.
    pub async fn save_run_stats(&self, stats: &RunStats) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO run_stats
                (id, started_at, duration_ms, sources_ok, sources_failed,
                 blogs_ok, blogs_failed, blogs_skipped, items_added,
                 items_deleted, success, error)
            VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&stats.started_at)
        .bind(stats.duration_ms)
        .bind(stats.sources_ok)
        .bind(stats.sources_failed)
        .bind(stats.blogs_ok)
        .bind(stats.blogs_failed)
        .bind(stats.blogs_skipped)
        .bind(stats.items_added)
        .bind(stats.items_deleted)
        .bind(stats.success)
        .bind(&stats.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Outcome of the most recent completed run, or `None` before the first.
    pub async fn get_run_stats(&self) -> Result<Option<RunStats>, StoreError> {
        let stats = sqlx::query_as::<_, RunStats>(
            r#"
            SELECT started_at, duration_ms, sources_ok, sources_failed,
                   blogs_ok, blogs_failed, blogs_skipped, items_added,
                   items_deleted, success, error
            FROM run_stats WHERE id = 1
        "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(stats)
    }
}
