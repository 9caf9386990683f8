//! Run orchestration: the single-flight full sync, the periodic scheduler,
//! and clear-and-resync recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::feed::fetcher::{fetch_feed, FetchOptions};
use crate::storage::{Blog, BlogStatus, Database, RunStats};
use crate::sync::adapters::sync_source;
use crate::util::{fmt_timestamp, now_timestamp};

/// Outcome of one `run_full_sync` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// True when the run was rejected because another was in flight;
    /// nothing was written.
    pub skipped: bool,
    pub success: bool,
    pub started_at: String,
    pub duration_ms: i64,
    pub sources_ok: i64,
    pub sources_failed: i64,
    pub blogs_ok: i64,
    pub blogs_failed: i64,
    pub blogs_skipped: i64,
    pub items_added: i64,
    pub items_deleted: i64,
    pub error: Option<String>,
}

impl RunReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn to_stats(&self) -> RunStats {
        RunStats {
            started_at: self.started_at.clone(),
            duration_ms: self.duration_ms,
            sources_ok: self.sources_ok,
            sources_failed: self.sources_failed,
            blogs_ok: self.blogs_ok,
            blogs_failed: self.blogs_failed,
            blogs_skipped: self.blogs_skipped,
            items_added: self.items_added,
            items_deleted: self.items_deleted,
            success: self.success,
            error: self.error.clone(),
        }
    }
}

/// Operator-facing snapshot for the status command.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub is_running: bool,
    pub blog_count: i64,
    pub item_count: i64,
    pub last_run: Option<RunStats>,
}

/// The sync engine: shared context plus the single-flight guard.
///
/// Clones share the guard, so a CLI-triggered run and a scheduled run can
/// never overlap no matter which clone starts first.
#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    client: reqwest::Client,
    config: Config,
    running: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(db: Database, client: reqwest::Client, config: Config) -> Self {
        Self {
            db,
            client,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs a full sync unless one is already in flight.
    ///
    /// A rejected run returns `skipped: true` immediately with no writes,
    /// not even to run_stats. A run that starts never panics past this
    /// boundary; internal failure becomes `success: false` with the error
    /// string, and the stats record is written either way.
    pub async fn run_full_sync(&self) -> RunReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("Sync already in progress, skipping run");
            return RunReport::skipped();
        }

        let report = self.execute_and_record().await;
        self.running.store(false, Ordering::SeqCst);
        report
    }

    /// Deletes all cached items, resets non-deleted blogs to a clean active
    /// state, and runs a full sync, all under one single-flight hold so no
    /// scheduled run can interleave with the wipe.
    pub async fn clear_and_resync(&self) -> Result<RunReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(RunReport::skipped());
        }

        let result = async {
            let cleared = self.db.delete_all_items().await?;
            self.db.reset_blogs_for_resync().await?;
            tracing::info!(cleared, "Cleared cached items for resync");
            Ok(self.execute_and_record().await)
        }
        .await;

        self.running.store(false, Ordering::SeqCst);
        result
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            is_running: self.is_running(),
            blog_count: self.db.count_blogs().await?,
            item_count: self.db.count_items().await?,
            last_run: self.db.get_run_stats().await?,
        })
    }

    async fn execute_and_record(&self) -> RunReport {
        let started_at = now_timestamp();
        let started = Instant::now();

        let mut report = match self.execute_run().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Sync run failed");
                RunReport {
                    success: false,
                    error: Some(e.to_string()),
                    ..RunReport::default()
                }
            }
        };
        report.started_at = started_at;
        report.duration_ms = started.elapsed().as_millis() as i64;

        // A stats write failure is a run-level failure, not a per-unit one
        if let Err(e) = self.db.save_run_stats(&report.to_stats()).await {
            tracing::error!(error = %e, "Failed to save run stats");
            report.success = false;
            if report.error.is_none() {
                report.error = Some(format!("failed to save run stats: {e}"));
            }
        }

        tracing::info!(
            success = report.success,
            duration_ms = report.duration_ms,
            sources_ok = report.sources_ok,
            sources_failed = report.sources_failed,
            blogs_ok = report.blogs_ok,
            blogs_failed = report.blogs_failed,
            blogs_skipped = report.blogs_skipped,
            items_added = report.items_added,
            items_deleted = report.items_deleted,
            "Sync run finished"
        );
        report
    }

    /// The run proper: retention sweep, then sources, then blog items.
    /// Per-unit failures are tallied and recorded on the unit's own row;
    /// only store-level failures abort the run.
    async fn execute_run(&self) -> Result<RunReport> {
        let mut report = RunReport {
            success: true,
            ..RunReport::default()
        };

        // Stage 1: retention sweep. Strictly-older items go; the cutoff
        // instant itself and anything future-dated stay.
        if self.config.max_item_age_days > 0 {
            let cutoff = fmt_timestamp(
                Utc::now() - chrono::Duration::days(i64::from(self.config.max_item_age_days)),
            );
            let deleted = self.db.delete_items_older_than(&cutoff).await?;
            report.items_deleted = deleted as i64;
            if deleted > 0 {
                tracing::info!(deleted, %cutoff, "Retention sweep purged old items");
            }
        }

        // Stage 2: sources, sequentially, each isolated.
        for source in self.db.list_enabled_sources().await? {
            match sync_source(&self.db, &self.client, &source, self.config.fetch_timeout()).await {
                Ok(_) => report.sources_ok += 1,
                Err(_) => report.sources_failed += 1,
            }
        }

        // Stage 3: blog items, concurrently with a bounded pool.
        let blogs = self.db.list_syncable_blogs(self.config.blog_page_size).await?;
        let (fetchable, skipped): (Vec<Blog>, Vec<Blog>) = blogs
            .into_iter()
            .partition(|b| !b.skip_item_fetch && b.status != BlogStatus::Inactive);
        report.blogs_skipped = skipped.len() as i64;

        let options = FetchOptions {
            timeout: self.config.fetch_timeout(),
            max_items: self.config.max_items_per_blog,
        };
        let outcomes: Vec<Result<usize, ()>> = stream::iter(fetchable)
            .map(|blog| {
                let db = self.db.clone();
                let client = self.client.clone();
                let options = options.clone();
                async move { sync_blog_items(&db, &client, &blog, &options).await }
            })
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(added) => {
                    report.blogs_ok += 1;
                    report.items_added += added as i64;
                }
                Err(()) => report.blogs_failed += 1,
            }
        }

        Ok(report)
    }
}

/// Fetches one blog's feed and reconciles its items. All failure detail
/// lands on the blog row; the caller only tallies.
async fn sync_blog_items(
    db: &Database,
    client: &reqwest::Client,
    blog: &Blog,
    options: &FetchOptions,
) -> Result<usize, ()> {
    let feed = match fetch_feed(client, &blog.feed_url, options).await {
        Ok(feed) => feed,
        Err(e) => {
            tracing::warn!(blog_id = blog.id, feed_url = %blog.feed_url, error = %e, "Blog fetch failed");
            if let Err(store_err) = db.set_blog_error(blog.id, &e.to_string()).await {
                tracing::warn!(blog_id = blog.id, error = %store_err, "Failed to record blog error");
            }
            return Err(());
        }
    };

    let record = async {
        let added = db.upsert_items(blog.id, &feed.items).await?;
        db.complete_blog_refresh(blog.id).await?;
        Ok::<usize, crate::storage::StoreError>(added)
    }
    .await;

    match record {
        Ok(added) => {
            tracing::debug!(blog_id = blog.id, added, "Blog refreshed");
            Ok(added)
        }
        Err(e) => {
            tracing::warn!(blog_id = blog.id, error = %e, "Failed to store blog items");
            let _ = db.set_blog_error(blog.id, &e.to_string()).await;
            Err(())
        }
    }
}

/// Handle onto the background scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the scheduler to stop and waits for the task to finish. An
    /// in-flight run completes; only the waiting loop is interrupted.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

/// Starts the periodic scheduler: one run after the startup delay, then one
/// per configured interval. Every run goes through the engine's
/// single-flight guard, so an overlapping manual run simply causes a skip.
pub fn start_scheduler(engine: SyncEngine) -> SchedulerHandle {
    let (shutdown, mut rx) = watch::channel(false);
    let startup_delay = Duration::from_secs(engine.config.startup_delay_secs);
    let interval_minutes = engine.config.sync_interval_minutes;

    let task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(startup_delay) => {}
            _ = rx.changed() => return,
        }
        engine.run_full_sync().await;

        if interval_minutes == 0 {
            tracing::info!("Sync interval is 0, scheduler exiting after startup run");
            return;
        }

        let period = Duration::from_secs(interval_minutes * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately; already ran

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    engine.run_full_sync().await;
                }
                _ = rx.changed() => return,
            }
        }
    });

    SchedulerHandle { shutdown, task }
}
