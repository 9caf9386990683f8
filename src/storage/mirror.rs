//! Read-only access to the foreign mirror subsystem's tables.
//!
//! The mirror tables (`mirror_channels`, `mirror_feeds`, `mirror_items`)
//! belong to another subsystem sharing the same SQLite file. This store
//! never writes to them and never creates them; their absence means the
//! subsystem is not installed, which the mirror adapter reports as a clean
//! unavailability rather than an error.

use sqlx::SqlitePool;

use super::schema::Database;
use super::types::{Blog, Item, StoreError};

/// Handle onto the foreign mirror tables.
pub struct MirrorStore {
    pool: SqlitePool,
}

/// A channel grouping in the foreign subsystem.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MirrorChannel {
    pub id: String,
    pub name: String,
}

/// A feed tracked by the foreign subsystem. `id` is the foreign identity
/// that mirror-sourced blogs carry as `foreign_feed_id`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MirrorFeed {
    pub id: String,
    pub channel: String,
    pub url: String,
    pub title: String,
    pub site_url: Option<String>,
    pub icon: Option<String>,
    pub status: String,
    pub last_fetched_at: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct MirrorItemRow {
    uid: String,
    url: Option<String>,
    title: String,
    content_html: String,
    summary: String,
    published: String,
    author: Option<String>,
}

impl MirrorItemRow {
    /// Mirrored items have no local row; `id`/`blog_id` are zero and the
    /// text/photo fields the foreign schema lacks come back empty.
    fn into_item(self) -> Item {
        Item {
            id: 0,
            blog_id: 0,
            uid: self.uid,
            url: self.url,
            title: self.title,
            content_text: String::new(),
            summary: self.summary,
            updated: self.published.clone(),
            fetched_at: self.published.clone(),
            published: self.published,
            content_html: self.content_html,
            author: self.author,
            photos: None,
            categories: Vec::new(),
        }
    }
}

impl MirrorStore {
    /// Whether the mirror subsystem's tables exist in this database file.
    pub async fn is_available(&self) -> Result<bool, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sqlite_master
            WHERE type = 'table'
              AND name IN ('mirror_channels', 'mirror_feeds', 'mirror_items')
        "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 == 3)
    }

    pub async fn channels(&self) -> Result<Vec<MirrorChannel>, StoreError> {
        let rows = sqlx::query_as::<_, MirrorChannel>(
            "SELECT id, name FROM mirror_channels ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Feeds in the foreign subsystem, optionally restricted to one channel.
    pub async fn feeds(&self, channel: Option<&str>) -> Result<Vec<MirrorFeed>, StoreError> {
        let rows = match channel {
            Some(channel) => {
                sqlx::query_as::<_, MirrorFeed>(
                    "SELECT id, channel, url, title, site_url, icon, status, last_fetched_at
                     FROM mirror_feeds WHERE channel = ? ORDER BY id",
                )
                .bind(channel)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MirrorFeed>(
                    "SELECT id, channel, url, title, site_url, icon, status, last_fetched_at
                     FROM mirror_feeds ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Items the foreign subsystem fetched for one of its feeds, newest
    /// first.
    pub async fn items_for_feed(
        &self,
        foreign_feed_id: &str,
        limit: i64,
    ) -> Result<Vec<Item>, StoreError> {
        let rows: Vec<MirrorItemRow> = sqlx::query_as(
            "SELECT uid, url, title, content_html, summary, published, author
             FROM mirror_items WHERE feed_id = ?
             ORDER BY published DESC LIMIT ?",
        )
        .bind(foreign_feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MirrorItemRow::into_item).collect())
    }
}

/// Where a blog's items live. Resolved once from the blog row; query paths
/// dispatch on this instead of re-checking provenance everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Items fetched by this engine, stored in the own items table
    Local { blog_id: i64 },
    /// Items fetched by the foreign subsystem, read through [`MirrorStore`]
    Mirrored { foreign_feed_id: String },
}

impl Blog {
    pub fn item_source(&self) -> ItemSource {
        match &self.foreign_feed_id {
            Some(id) => ItemSource::Mirrored {
                foreign_feed_id: id.clone(),
            },
            None => ItemSource::Local { blog_id: self.id },
        }
    }
}

impl Database {
    pub fn mirror(&self) -> MirrorStore {
        MirrorStore {
            pool: self.pool.clone(),
        }
    }

    /// Unified item read across both storage locations.
    pub async fn items_for(
        &self,
        source: &ItemSource,
        limit: i64,
    ) -> Result<Vec<Item>, StoreError> {
        match source {
            ItemSource::Local { blog_id } => self.items_for_blog(*blog_id, limit).await,
            ItemSource::Mirrored { foreign_feed_id } => {
                self.mirror().items_for_feed(foreign_feed_id, limit).await
            }
        }
    }
}
