use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use feedsync::config::Config;
use feedsync::feed::{discover_feed, generate_subscription_list, CandidateBlog, FetchOptions};
use feedsync::storage::{Database, NewSource, SourceKind, StoreError};
use feedsync::sync::{start_scheduler, RunReport, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Feed aggregation sync engine", version)]
struct Args {
    /// Path to the config file
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine: startup sync, then periodic syncs until interrupted
    Run,
    /// Run one full sync and exit
    Sync {
        /// Wipe cached items and reset blog state before syncing
        #[arg(long)]
        clear: bool,
    },
    /// Show engine status and the last run's outcome
    Status,
    /// Export all blogs as a subscription-list document
    Export {
        /// Write to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Probe a URL for a feed (direct or via HTML feed links)
    Discover { url: String },
    /// Register a source for the sync engine
    AddSource {
        /// One of: list-url, list-inline, mirror, remote-directory
        #[arg(long)]
        kind: String,
        /// Subscription-list URL (list-url)
        #[arg(long)]
        url: Option<String>,
        /// File whose contents become the inline document (list-inline)
        #[arg(long, value_name = "FILE")]
        document: Option<PathBuf>,
        /// Remote directory instance base URL (remote-directory)
        #[arg(long)]
        instance: Option<String>,
        /// Remote directory account (remote-directory)
        #[arg(long)]
        account: Option<String>,
        /// Category filter (remote-directory) or channel filter (mirror)
        #[arg(long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).context("Failed to load configuration")?;

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(e @ StoreError::InstanceLocked) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    match args.command {
        Command::Run => {
            let engine = SyncEngine::new(db, client, config);
            let scheduler = start_scheduler(engine);
            tracing::info!("Scheduler started, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutting down");
            scheduler.stop().await;
        }
        Command::Sync { clear } => {
            let engine = SyncEngine::new(db, client, config);
            let report = if clear {
                engine.clear_and_resync().await?
            } else {
                engine.run_full_sync().await
            };
            print_report(&report);
            if !report.success && !report.skipped {
                std::process::exit(1);
            }
        }
        Command::Status => {
            let engine = SyncEngine::new(db, client, config);
            let status = engine.sync_status().await?;
            println!(
                "running: {}\nblogs: {}\nitems: {}",
                status.is_running, status.blog_count, status.item_count
            );
            match status.last_run {
                Some(run) => {
                    println!(
                        "last run: {} ({}ms, success: {})",
                        run.started_at, run.duration_ms, run.success
                    );
                    println!(
                        "  sources ok/failed: {}/{}",
                        run.sources_ok, run.sources_failed
                    );
                    println!(
                        "  blogs ok/failed/skipped: {}/{}/{}",
                        run.blogs_ok, run.blogs_failed, run.blogs_skipped
                    );
                    println!(
                        "  items added/deleted: {}/{}",
                        run.items_added, run.items_deleted
                    );
                    if let Some(error) = run.error {
                        println!("  error: {}", error);
                    }
                }
                None => println!("last run: never"),
            }
        }
        Command::Export { output } => {
            let blogs = db.list_all_blogs().await?;
            let candidates: Vec<CandidateBlog> = blogs
                .into_iter()
                .map(|b| CandidateBlog {
                    title: b.title,
                    feed_url: b.feed_url,
                    site_url: b.site_url,
                    feed_type: b.feed_type,
                    category: b.category,
                })
                .collect();
            let document = generate_subscription_list(&candidates)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, document)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} blogs to {}", candidates.len(), path.display());
                }
                None => println!("{}", document),
            }
        }
        Command::Discover { url } => {
            let options = FetchOptions {
                timeout: config.fetch_timeout(),
                ..FetchOptions::default()
            };
            let found = discover_feed(&client, &url, &options).await?;
            println!("title: {}", found.title);
            println!("feed_url: {}", found.feed_url);
            println!("feed_type: {}", found.feed_type);
            if let Some(site) = found.site_url {
                println!("site_url: {}", site);
            }
        }
        Command::AddSource {
            kind,
            url,
            document,
            instance,
            account,
            category,
        } => {
            let kind = SourceKind::parse(&kind)
                .ok_or_else(|| anyhow::anyhow!("Unknown source kind: {}", kind))?;
            let inline_document = match document {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                ),
                None => None,
            };
            let id = db
                .create_source(&NewSource {
                    kind: Some(kind),
                    url,
                    inline_document,
                    remote_instance: instance,
                    remote_account: account,
                    category_filter: category,
                    sync_interval_minutes: config.sync_interval_minutes as i64,
                })
                .await?;
            println!("Created source {} ({})", id, kind.as_str());
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    if report.skipped {
        println!("Sync already in progress, nothing done.");
        return;
    }
    println!(
        "{}: {}ms, sources {}/{}, blogs {}/{}/{} (ok/failed/skipped), items +{}/-{}",
        if report.success { "ok" } else { "FAILED" },
        report.duration_ms,
        report.sources_ok,
        report.sources_failed,
        report.blogs_ok,
        report.blogs_failed,
        report.blogs_skipped,
        report.items_added,
        report.items_deleted,
    );
    if let Some(error) = &report.error {
        println!("error: {}", error);
    }
}
