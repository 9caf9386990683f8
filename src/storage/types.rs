use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store-level errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process has the database locked
    #[error("Another instance of feedsync appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::InstanceLocked;
        }

        StoreError::Other(err)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// The adapter that services a configured source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Subscription-list document fetched from a URL
    ListUrl,
    /// Subscription-list document stored inline on the source
    ListInline,
    /// Reference mirror of a foreign subscription subsystem
    Mirror,
    /// Subscription list exported by a hosted remote directory
    RemoteDirectory,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ListUrl => "list-url",
            SourceKind::ListInline => "list-inline",
            SourceKind::Mirror => "mirror",
            SourceKind::RemoteDirectory => "remote-directory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "list-url" => Some(SourceKind::ListUrl),
            "list-inline" => Some(SourceKind::ListInline),
            "mirror" => Some(SourceKind::Mirror),
            "remote-directory" => Some(SourceKind::RemoteDirectory),
            _ => None,
        }
    }
}

/// A configured origin of candidate blogs.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub kind: SourceKind,
    /// Subscription-list URL (list-url kind)
    pub url: Option<String>,
    /// Inline subscription-list document (list-inline kind)
    pub inline_document: Option<String>,
    /// Remote directory instance base URL (remote-directory kind)
    pub remote_instance: Option<String>,
    /// Remote directory account (remote-directory kind)
    pub remote_account: Option<String>,
    /// Category filter (remote-directory) or channel filter (mirror)
    pub category_filter: Option<String>,
    pub enabled: bool,
    pub sync_interval_minutes: i64,
    pub last_synced_at: Option<String>,
    pub last_sync_error: Option<String>,
    pub created_at: String,
}

/// Insert shape for a source; status fields start clean.
#[derive(Debug, Clone, Default)]
pub struct NewSource {
    pub kind: Option<SourceKind>,
    pub url: Option<String>,
    pub inline_document: Option<String>,
    pub remote_instance: Option<String>,
    pub remote_account: Option<String>,
    pub category_filter: Option<String>,
    pub sync_interval_minutes: i64,
}

/// Row shape for source queries; converts to [`Source`] with kind parsing.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    pub id: i64,
    pub kind: String,
    pub url: Option<String>,
    pub inline_document: Option<String>,
    pub remote_instance: Option<String>,
    pub remote_account: Option<String>,
    pub category_filter: Option<String>,
    pub enabled: bool,
    pub sync_interval_minutes: i64,
    pub last_synced_at: Option<String>,
    pub last_sync_error: Option<String>,
    pub created_at: String,
}

impl SourceRow {
    /// Rows with an unrecognized kind are dropped by callers; the engine
    /// only enumerates kinds it knows how to sync.
    pub(crate) fn into_source(self) -> Option<Source> {
        let kind = SourceKind::parse(&self.kind)?;
        Some(Source {
            id: self.id,
            kind,
            url: self.url,
            inline_document: self.inline_document,
            remote_instance: self.remote_instance,
            remote_account: self.remote_account,
            category_filter: self.category_filter,
            enabled: self.enabled,
            sync_interval_minutes: self.sync_interval_minutes,
            last_synced_at: self.last_synced_at,
            last_sync_error: self.last_sync_error,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// Blogs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlogStatus {
    Active,
    Error,
    /// Unsubscribed via the webhook side channel; history preserved
    Inactive,
    /// Soft-deleted tombstone; automated sync must never resurrect it
    Deleted,
}

impl BlogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlogStatus::Active => "active",
            BlogStatus::Error => "error",
            BlogStatus::Inactive => "inactive",
            BlogStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "error" => BlogStatus::Error,
            "inactive" => BlogStatus::Inactive,
            "deleted" => BlogStatus::Deleted,
            _ => BlogStatus::Active,
        }
    }
}

/// A subscribed feed and its metadata.
#[derive(Debug, Clone)]
pub struct Blog {
    pub id: i64,
    pub feed_url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub feed_type: String,
    pub category: String,
    pub tags: Vec<String>,
    pub icon: Option<String>,
    pub author: Option<String>,
    pub status: BlogStatus,
    pub last_fetched_at: Option<String>,
    pub last_error: Option<String>,
    pub item_count: i64,
    pub pinned: bool,
    pub hidden: bool,
    pub notes: Option<String>,
    /// `None` for manually added blogs, else the adapter tag that created it
    pub provenance: Option<String>,
    pub source_id: Option<i64>,
    /// Foreign feed reference; present only on mirror-sourced blogs
    pub foreign_feed_id: Option<String>,
    pub foreign_channel: Option<String>,
    /// Mirror blogs never fetch their own items
    pub skip_item_fetch: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BlogRow {
    pub id: i64,
    pub feed_url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub feed_type: String,
    pub category: String,
    pub tags: String,
    pub icon: Option<String>,
    pub author: Option<String>,
    pub status: String,
    pub last_fetched_at: Option<String>,
    pub last_error: Option<String>,
    pub item_count: i64,
    pub pinned: bool,
    pub hidden: bool,
    pub notes: Option<String>,
    pub provenance: Option<String>,
    pub source_id: Option<i64>,
    pub foreign_feed_id: Option<String>,
    pub foreign_channel: Option<String>,
    pub skip_item_fetch: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl BlogRow {
    pub(crate) fn into_blog(self) -> Blog {
        Blog {
            id: self.id,
            feed_url: self.feed_url,
            title: self.title,
            description: self.description,
            site_url: self.site_url,
            feed_type: self.feed_type,
            category: self.category,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            icon: self.icon,
            author: self.author,
            status: BlogStatus::parse(&self.status),
            last_fetched_at: self.last_fetched_at,
            last_error: self.last_error,
            item_count: self.item_count,
            pinned: self.pinned,
            hidden: self.hidden,
            notes: self.notes,
            provenance: self.provenance,
            source_id: self.source_id,
            foreign_feed_id: self.foreign_feed_id,
            foreign_channel: self.foreign_channel,
            skip_item_fetch: self.skip_item_fetch,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Upsert input produced by the source adapters.
///
/// Carries only sync-owned fields plus identity/provenance; operator-owned
/// fields (description, tags, notes, flags) are insert-time defaults and
/// never appear here, so a later sync cannot clobber them.
#[derive(Debug, Clone)]
pub struct NewBlog {
    pub feed_url: String,
    pub title: String,
    pub site_url: Option<String>,
    pub feed_type: String,
    pub category: String,
    pub icon: Option<String>,
    pub provenance: Option<String>,
    pub source_id: Option<i64>,
    pub foreign_feed_id: Option<String>,
    pub foreign_channel: Option<String>,
    pub skip_item_fetch: bool,
    /// Mirrored status/last-fetch from the foreign subsystem; `None` for
    /// non-mirror candidates, which keep whatever status the row has.
    pub mirrored_status: Option<BlogStatus>,
    pub mirrored_last_fetched_at: Option<String>,
}

impl NewBlog {
    /// A plain (non-mirror) candidate with the common fields filled in.
    pub fn plain(feed_url: &str, title: &str, category: &str) -> Self {
        Self {
            feed_url: feed_url.to_string(),
            title: title.to_string(),
            site_url: None,
            feed_type: "rss".to_string(),
            category: category.to_string(),
            icon: None,
            provenance: None,
            source_id: None,
            foreign_feed_id: None,
            foreign_channel: None,
            skip_item_fetch: false,
            mirrored_status: None,
            mirrored_last_fetched_at: None,
        }
    }
}

/// Outcome of a reconciling blog upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlogUpsert {
    Inserted,
    Updated,
    /// A tombstone owns this feed URL; the upsert was a no-op
    SkippedDeleted,
}

// ============================================================================
// Items
// ============================================================================

/// A normalized post stored under a blog.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: i64,
    pub blog_id: i64,
    pub uid: String,
    pub url: Option<String>,
    pub title: String,
    pub content_html: String,
    pub content_text: String,
    pub summary: String,
    pub published: String,
    pub updated: String,
    pub author: Option<String>,
    pub photos: Option<Vec<String>>,
    pub categories: Vec<String>,
    pub fetched_at: String,
}

/// Insert shape for an item produced by feed normalization.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub uid: String,
    pub url: Option<String>,
    pub title: String,
    pub content_html: String,
    pub content_text: String,
    pub summary: String,
    /// Canonical RFC 3339 UTC timestamp
    pub published: String,
    pub updated: String,
    pub author: Option<String>,
    pub photos: Option<Vec<String>>,
    pub categories: Vec<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub id: i64,
    pub blog_id: i64,
    pub uid: String,
    pub url: Option<String>,
    pub title: String,
    pub content_html: String,
    pub content_text: String,
    pub summary: String,
    pub published: String,
    pub updated: String,
    pub author: Option<String>,
    pub photos: Option<String>,
    pub categories: String,
    pub fetched_at: String,
}

impl ItemRow {
    pub(crate) fn into_item(self) -> Item {
        Item {
            id: self.id,
            blog_id: self.blog_id,
            uid: self.uid,
            url: self.url,
            title: self.title,
            content_html: self.content_html,
            content_text: self.content_text,
            summary: self.summary,
            published: self.published,
            updated: self.updated,
            author: self.author,
            photos: self
                .photos
                .and_then(|p| serde_json::from_str(&p).ok()),
            categories: serde_json::from_str(&self.categories).unwrap_or_default(),
            fetched_at: self.fetched_at,
        }
    }
}

// ============================================================================
// Run statistics
// ============================================================================

/// Outcome of the most recently completed full run. A single mutable record,
/// overwritten every run, never historized.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunStats {
    pub started_at: String,
    pub duration_ms: i64,
    pub sources_ok: i64,
    pub sources_failed: i64,
    pub blogs_ok: i64,
    pub blogs_failed: i64,
    pub blogs_skipped: i64,
    pub items_added: i64,
    pub items_deleted: i64,
    pub success: bool,
    pub error: Option<String>,
}
