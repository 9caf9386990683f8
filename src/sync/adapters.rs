//! Per-source-kind ingestion adapters.
//!
//! Each adapter turns one configured source into a batch of candidate blogs
//! and reconciles them through the store's upsert. Adapters never fetch
//! items; the item stage belongs to the run orchestrator.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

use crate::feed::sublist::{
    fetch_subscription_list, parse_subscription_list, CandidateBlog, SublistError,
};
use crate::storage::{
    BlogStatus, BlogUpsert, Database, MirrorFeed, NewBlog, Source, SourceKind, StoreError,
};
use crate::util::validate_url;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The mirror subsystem's tables are absent from this database
    #[error("mirror subsystem is not installed in this database")]
    AdapterUnavailable,

    /// A source row is missing the configuration its kind requires
    #[error("source {0} misconfigured: {1}")]
    Misconfigured(i64, &'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Sublist(#[from] SublistError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome tallies for one source sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSyncReport {
    pub added: usize,
    pub updated: usize,
    /// Candidates refused because a tombstone owns their feed URL
    pub skipped_deleted: usize,
    pub total: usize,
}

impl SourceSyncReport {
    fn record(&mut self, outcome: BlogUpsert) {
        self.total += 1;
        match outcome {
            BlogUpsert::Inserted => self.added += 1,
            BlogUpsert::Updated => self.updated += 1,
            BlogUpsert::SkippedDeleted => self.skipped_deleted += 1,
        }
    }
}

/// Syncs one source through the adapter for its kind.
///
/// The source's last-sync timestamp and error column are updated win or
/// lose, so `sources` always reflects the latest attempt.
pub async fn sync_source(
    db: &Database,
    client: &reqwest::Client,
    source: &Source,
    timeout: Duration,
) -> Result<SourceSyncReport, SyncError> {
    let result = run_adapter(db, client, source, timeout).await;

    let error = result.as_ref().err().map(|e| e.to_string());
    if let Err(store_err) = db.record_source_sync(source.id, error.as_deref()).await {
        tracing::warn!(source_id = source.id, error = %store_err, "Failed to record source sync status");
    }

    match &result {
        Ok(report) => tracing::info!(
            source_id = source.id,
            kind = source.kind.as_str(),
            added = report.added,
            updated = report.updated,
            skipped_deleted = report.skipped_deleted,
            "Source synced"
        ),
        Err(e) => tracing::warn!(
            source_id = source.id,
            kind = source.kind.as_str(),
            error = %e,
            "Source sync failed"
        ),
    }

    result
}

async fn run_adapter(
    db: &Database,
    client: &reqwest::Client,
    source: &Source,
    timeout: Duration,
) -> Result<SourceSyncReport, SyncError> {
    match source.kind {
        SourceKind::ListUrl => {
            let url = source
                .url
                .as_deref()
                .ok_or(SyncError::Misconfigured(source.id, "list-url source has no url"))?;
            validate_url(url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
            let candidates = fetch_subscription_list(client, url, timeout).await?;
            upsert_candidates(db, source, candidates, "list").await
        }
        SourceKind::ListInline => {
            let document = source.inline_document.as_deref().ok_or(SyncError::Misconfigured(
                source.id,
                "list-inline source has no document",
            ))?;
            let candidates = parse_subscription_list(document)?;
            upsert_candidates(db, source, candidates, "list").await
        }
        SourceKind::RemoteDirectory => {
            let export_url = remote_directory_url(source)?;
            let mut candidates = fetch_subscription_list(client, export_url.as_str(), timeout).await?;
            // Category fallback chain: outline folder, configured filter,
            // account name. Remote-directory blogs are never uncategorized.
            let fallback = source
                .category_filter
                .clone()
                .or_else(|| source.remote_account.clone())
                .unwrap_or_default();
            for candidate in &mut candidates {
                if candidate.category.is_empty() {
                    candidate.category = fallback.clone();
                }
            }
            upsert_candidates(db, source, candidates, "remote-directory").await
        }
        SourceKind::Mirror => sync_mirror_source(db, source).await,
    }
}

/// Builds the subscription-list export URL for a remote directory account.
fn remote_directory_url(source: &Source) -> Result<url::Url, SyncError> {
    let instance = source.remote_instance.as_deref().ok_or(SyncError::Misconfigured(
        source.id,
        "remote-directory source has no instance",
    ))?;
    let account = source.remote_account.as_deref().ok_or(SyncError::Misconfigured(
        source.id,
        "remote-directory source has no account",
    ))?;

    let mut export =
        validate_url(instance).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
    // Appends a segment rather than joining, so an instance URL like
    // `https://host/dir` keeps its last path segment
    export
        .path_segments_mut()
        .map_err(|_| SyncError::InvalidUrl("instance URL cannot be a base".to_string()))?
        .pop_if_empty()
        .push("opml");
    export
        .query_pairs_mut()
        .append_pair("account", account);
    if let Some(filter) = source.category_filter.as_deref() {
        export.query_pairs_mut().append_pair("category", filter);
    }
    Ok(export)
}

async fn upsert_candidates(
    db: &Database,
    source: &Source,
    candidates: Vec<CandidateBlog>,
    provenance: &str,
) -> Result<SourceSyncReport, SyncError> {
    let mut report = SourceSyncReport::default();
    for candidate in candidates {
        let new_blog = NewBlog {
            feed_url: candidate.feed_url,
            title: candidate.title,
            site_url: candidate.site_url,
            feed_type: candidate.feed_type,
            category: candidate.category,
            icon: None,
            provenance: Some(provenance.to_string()),
            source_id: Some(source.id),
            foreign_feed_id: None,
            foreign_channel: None,
            skip_item_fetch: false,
            mirrored_status: None,
            mirrored_last_fetched_at: None,
        };
        report.record(db.upsert_blog(&new_blog).await?);
    }
    Ok(report)
}

/// Mirror adapter: reference blogs for every feed the foreign subsystem
/// tracks, plus orphan detection for feeds that vanished upstream.
async fn sync_mirror_source(db: &Database, source: &Source) -> Result<SourceSyncReport, SyncError> {
    let mirror = db.mirror();
    if !mirror.is_available().await? {
        return Err(SyncError::AdapterUnavailable);
    }

    let feeds = mirror.feeds(source.category_filter.as_deref()).await?;
    let mut report = SourceSyncReport::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(feeds.len());

    for feed in feeds {
        seen.insert(feed.id.clone());
        report.record(db.upsert_blog(&mirror_feed_to_blog(feed, source.id)).await?);
    }

    let orphaned = db.soft_delete_orphaned_mirror_blogs(source.id, &seen).await?;
    if orphaned > 0 {
        tracing::info!(source_id = source.id, orphaned, "Soft-deleted orphaned mirror blogs");
    }

    Ok(report)
}

fn mirror_feed_to_blog(feed: MirrorFeed, source_id: i64) -> NewBlog {
    // A foreign `deleted` marker only demotes to inactive; tombstoning is
    // the orphan pass's job
    let status = match BlogStatus::parse(&feed.status) {
        BlogStatus::Deleted => BlogStatus::Inactive,
        other => other,
    };
    NewBlog {
        feed_url: feed.url,
        title: feed.title,
        site_url: feed.site_url,
        feed_type: "rss".to_string(),
        category: feed.channel.clone(),
        icon: feed.icon,
        provenance: Some("mirror".to_string()),
        source_id: Some(source_id),
        foreign_feed_id: Some(feed.id),
        foreign_channel: Some(feed.channel),
        skip_item_fetch: true,
        mirrored_status: Some(status),
        mirrored_last_fetched_at: feed.last_fetched_at,
    }
}

// ============================================================================
// Webhook side channel
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// A subscription change pushed in from outside the sync cycle.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub action: SubscriptionAction,
    pub feed_url: String,
    pub group_name: Option<String>,
    pub title: Option<String>,
}

/// Applies a pushed subscription change.
///
/// Subscribe creates a reference blog unless the URL already has one; an
/// existing blog is never overwritten (a manual entry stays exactly as the
/// operator left it), except that an inactive adapter-created blog is
/// reactivated. Unsubscribe marks adapter-created blogs inactive, keeping
/// their history; it never touches manual blogs and never deletes.
pub async fn handle_subscription_event(
    db: &Database,
    event: &SubscriptionEvent,
) -> Result<(), SyncError> {
    validate_url(&event.feed_url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;

    match event.action {
        SubscriptionAction::Subscribe => {
            if let Some(existing) = db.find_blog_by_feed_url(&event.feed_url).await? {
                if existing.provenance.is_some() && existing.status == BlogStatus::Inactive {
                    tracing::info!(blog_id = existing.id, "Reactivating blog on subscribe event");
                    db.reactivate_blog(existing.id).await?;
                }
                return Ok(());
            }

            let mut candidate = NewBlog::plain(
                &event.feed_url,
                event.title.as_deref().unwrap_or(&event.feed_url),
                event.group_name.as_deref().unwrap_or(""),
            );
            candidate.provenance = Some("webhook".to_string());
            match db.upsert_blog(&candidate).await? {
                BlogUpsert::SkippedDeleted => {
                    tracing::info!(feed_url = %event.feed_url, "Ignoring subscribe for soft-deleted blog");
                }
                outcome => {
                    tracing::info!(feed_url = %event.feed_url, ?outcome, "Applied subscribe event");
                }
            }
            Ok(())
        }
        SubscriptionAction::Unsubscribe => {
            let changed = db.mark_blog_inactive(&event.feed_url).await?;
            tracing::info!(feed_url = %event.feed_url, changed, "Applied unsubscribe event");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests_support::{install_mirror_tables, seed_mirror_feed};
    use crate::storage::NewSource;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn event(action: SubscriptionAction, url: &str) -> SubscriptionEvent {
        SubscriptionEvent {
            action,
            feed_url: url.to_string(),
            group_name: Some("news".to_string()),
            title: Some("Pushed Blog".to_string()),
        }
    }

    #[tokio::test]
    async fn test_inline_list_adapter_end_to_end() {
        let db = test_db().await;
        let document = r#"<opml><body>
            <outline text="Solo" xmlUrl="https://solo.example.com/feed"/>
            <outline text="Tech">
              <outline text="One" xmlUrl="https://one.example.com/feed"/>
            </outline>
        </body></opml>"#;
        let id = db
            .create_source(&NewSource {
                kind: Some(SourceKind::ListInline),
                inline_document: Some(document.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let source = db.get_source(id).await.unwrap();

        let client = reqwest::Client::new();
        let report = sync_source(&db, &client, &source, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.total, 2);

        let blog = db
            .find_blog_by_feed_url("https://one.example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blog.category, "Tech");
        assert_eq!(blog.provenance.as_deref(), Some("list"));
        assert_eq!(blog.source_id, Some(id));

        // Second pass is pure updates
        let report = sync_source(&db, &client, &source, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.updated, 2);

        let source = db.get_source(id).await.unwrap();
        assert!(source.last_synced_at.is_some());
        assert!(source.last_sync_error.is_none());
    }

    #[tokio::test]
    async fn test_mirror_adapter_unavailable_without_tables() {
        let db = test_db().await;
        let id = db
            .create_source(&NewSource {
                kind: Some(SourceKind::Mirror),
                ..Default::default()
            })
            .await
            .unwrap();
        let source = db.get_source(id).await.unwrap();

        let client = reqwest::Client::new();
        let result = sync_source(&db, &client, &source, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(SyncError::AdapterUnavailable)));

        // Failure still recorded on the source row
        let source = db.get_source(id).await.unwrap();
        assert!(source.last_sync_error.is_some());
    }

    #[tokio::test]
    async fn test_mirror_adapter_creates_reference_blogs_and_orphans() {
        let db = test_db().await;
        install_mirror_tables(&db).await;
        seed_mirror_feed(&db, "f-1", "news", "https://a.example.com/feed").await;
        seed_mirror_feed(&db, "f-2", "news", "https://b.example.com/feed").await;

        let id = db
            .create_source(&NewSource {
                kind: Some(SourceKind::Mirror),
                ..Default::default()
            })
            .await
            .unwrap();
        let source = db.get_source(id).await.unwrap();
        let client = reqwest::Client::new();

        let report = sync_source(&db, &client, &source, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.added, 2);

        let blog = db
            .find_blog_by_feed_url("https://a.example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert!(blog.skip_item_fetch);
        assert_eq!(blog.foreign_feed_id.as_deref(), Some("f-1"));
        assert_eq!(blog.foreign_channel.as_deref(), Some("news"));
        assert_eq!(blog.last_fetched_at.as_deref(), Some("2024-06-01T00:00:00Z"));

        // Feed f-2 vanishes upstream; next pass tombstones its blog
        sqlx::query("DELETE FROM mirror_feeds WHERE id = 'f-2'")
            .execute(&db.pool)
            .await
            .unwrap();
        sync_source(&db, &client, &source, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(db
            .find_blog_by_feed_url("https://b.example.com/feed")
            .await
            .unwrap()
            .is_none());
        assert!(db
            .find_blog_by_feed_url("https://a.example.com/feed")
            .await
            .unwrap()
            .is_some());
    }

    fn remote_source(instance: &str, category_filter: Option<&str>) -> Source {
        Source {
            id: 1,
            kind: SourceKind::RemoteDirectory,
            url: None,
            inline_document: None,
            remote_instance: Some(instance.to_string()),
            remote_account: Some("alice".to_string()),
            category_filter: category_filter.map(|c| c.to_string()),
            enabled: true,
            sync_interval_minutes: 60,
            last_synced_at: None,
            last_sync_error: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_remote_directory_url_shape() {
        let source = remote_source("https://directory.example.com/", Some("tech"));
        let url = remote_directory_url(&source).unwrap();
        assert_eq!(
            url.as_str(),
            "https://directory.example.com/opml?account=alice&category=tech"
        );
    }

    #[tokio::test]
    async fn test_remote_directory_url_keeps_instance_path() {
        // No trailing slash on the instance path; it must not be replaced
        let source = remote_source("https://directory.example.com/reader", None);
        let url = remote_directory_url(&source).unwrap();
        assert_eq!(
            url.as_str(),
            "https://directory.example.com/reader/opml?account=alice"
        );
    }

    #[tokio::test]
    async fn test_source_sync_leaves_manual_blog_unowned() {
        let db = test_db().await;
        db.upsert_blog(&NewBlog::plain("https://mine.example.com/feed", "Mine", "own"))
            .await
            .unwrap();

        let document = r#"<opml><body>
            <outline text="Mine Renamed" xmlUrl="https://mine.example.com/feed"/>
        </body></opml>"#;
        let id = db
            .create_source(&NewSource {
                kind: Some(SourceKind::ListInline),
                inline_document: Some(document.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let source = db.get_source(id).await.unwrap();
        let client = reqwest::Client::new();
        sync_source(&db, &client, &source, Duration::from_secs(5))
            .await
            .unwrap();

        let blog = db
            .find_blog_by_feed_url("https://mine.example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blog.title, "Mine Renamed");
        assert!(blog.provenance.is_none());
        assert!(blog.source_id.is_none());

        // Deleting the source must not take the manual blog with it
        db.delete_source(id).await.unwrap();
        assert!(db
            .find_blog_by_feed_url("https://mine.example.com/feed")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_subscribe_creates_then_never_overwrites_manual() {
        let db = test_db().await;

        handle_subscription_event(&db, &event(SubscriptionAction::Subscribe, "https://p.example.com/feed"))
            .await
            .unwrap();
        let blog = db
            .find_blog_by_feed_url("https://p.example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blog.title, "Pushed Blog");
        assert_eq!(blog.category, "news");
        assert_eq!(blog.provenance.as_deref(), Some("webhook"));

        // Manual blog with the same URL scenario: existing blog untouched
        db.upsert_blog(&NewBlog::plain("https://manual.example.com/feed", "Mine", "own"))
            .await
            .unwrap();
        handle_subscription_event(
            &db,
            &event(SubscriptionAction::Subscribe, "https://manual.example.com/feed"),
        )
        .await
        .unwrap();
        let blog = db
            .find_blog_by_feed_url("https://manual.example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blog.title, "Mine");
        assert_eq!(blog.category, "own");
        assert!(blog.provenance.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_marks_inactive_then_resubscribe_reactivates() {
        let db = test_db().await;
        let url = "https://p.example.com/feed";

        handle_subscription_event(&db, &event(SubscriptionAction::Subscribe, url))
            .await
            .unwrap();
        handle_subscription_event(&db, &event(SubscriptionAction::Unsubscribe, url))
            .await
            .unwrap();
        let blog = db.find_blog_by_feed_url(url).await.unwrap().unwrap();
        assert_eq!(blog.status, BlogStatus::Inactive);

        handle_subscription_event(&db, &event(SubscriptionAction::Subscribe, url))
            .await
            .unwrap();
        let blog = db.find_blog_by_feed_url(url).await.unwrap().unwrap();
        assert_eq!(blog.status, BlogStatus::Active);
    }

    #[tokio::test]
    async fn test_unsubscribe_never_touches_manual_blogs() {
        let db = test_db().await;
        db.upsert_blog(&NewBlog::plain("https://manual.example.com/feed", "Mine", ""))
            .await
            .unwrap();

        handle_subscription_event(
            &db,
            &event(SubscriptionAction::Unsubscribe, "https://manual.example.com/feed"),
        )
        .await
        .unwrap();
        let blog = db
            .find_blog_by_feed_url("https://manual.example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blog.status, BlogStatus::Active);
    }

    #[tokio::test]
    async fn test_webhook_rejects_invalid_urls() {
        let db = test_db().await;
        let result = handle_subscription_event(
            &db,
            &event(SubscriptionAction::Subscribe, "http://localhost/feed"),
        )
        .await;
        assert!(matches!(result, Err(SyncError::InvalidUrl(_))));
    }
}
