use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to
        // release before returning SQLITE_BUSY. Handles transient contention
        // between a scheduled run and CLI commands automatically.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; the fetch fan-out funnels all writes
        // through upserts, so a small pool covers peak readers.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All migrations use `IF NOT EXISTS` for idempotency, so re-running on
    /// an existing database is a no-op. The mirror subsystem's foreign
    /// tables are deliberately NOT created here: they belong to that
    /// subsystem, and their absence is how the mirror adapter detects that
    /// the subsystem is not installed.
    async fn migrate(&self) -> Result<()> {
        // Per-connection setting, must be outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                url TEXT,
                inline_document TEXT,
                remote_instance TEXT,
                remote_account TEXT,
                category_filter TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                sync_interval_minutes INTEGER NOT NULL DEFAULT 60,
                last_synced_at TEXT,
                last_sync_error TEXT,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // feed_url uniqueness is enforced for live rows only: a soft-deleted
        // tombstone keeps its URL, and the reconciliation layer refuses to
        // upsert over it.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blogs (
                id INTEGER PRIMARY KEY,
                feed_url TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                site_url TEXT,
                feed_type TEXT NOT NULL DEFAULT 'rss',
                category TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                icon TEXT,
                author TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                last_fetched_at TEXT,
                last_error TEXT,
                item_count INTEGER NOT NULL DEFAULT 0,
                pinned INTEGER NOT NULL DEFAULT 0,
                hidden INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                provenance TEXT,
                source_id INTEGER,
                foreign_feed_id TEXT,
                foreign_channel TEXT,
                skip_item_fetch INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_blogs_feed_url_live
             ON blogs(feed_url) WHERE status != 'deleted'",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blogs_source ON blogs(source_id)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                blog_id INTEGER NOT NULL REFERENCES blogs(id) ON DELETE CASCADE,
                uid TEXT NOT NULL,
                url TEXT,
                title TEXT NOT NULL,
                content_html TEXT NOT NULL DEFAULT '',
                content_text TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                published TEXT NOT NULL,
                updated TEXT NOT NULL,
                author TEXT,
                photos TEXT,
                categories TEXT NOT NULL DEFAULT '[]',
                fetched_at TEXT NOT NULL,
                UNIQUE(blog_id, uid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_blog ON items(blog_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_published ON items(published DESC)")
            .execute(&mut *tx)
            .await?;

        // Single overwritten row (id = 1)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                started_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                sources_ok INTEGER NOT NULL,
                sources_failed INTEGER NOT NULL,
                blogs_ok INTEGER NOT NULL,
                blogs_failed INTEGER NOT NULL,
                blogs_skipped INTEGER NOT NULL,
                items_added INTEGER NOT NULL,
                items_deleted INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
