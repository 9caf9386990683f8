//! Configuration file parser for feedsync's config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde, though we log a warning when
//! the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database_path: String,

    /// Minutes between scheduled full sync runs. 0 = on-demand only.
    pub sync_interval_minutes: u64,

    /// Delay before the first scheduled run after process start, so the
    /// initial sync does not compete with server warm-up.
    pub startup_delay_secs: u64,

    /// Per-fetch timeout in seconds (feed downloads, subscription lists,
    /// remote directory lookups).
    pub fetch_timeout_secs: u64,

    /// Maximum items kept per blog per fetch (0 = unlimited).
    pub max_items_per_blog: usize,

    /// Items whose published date is older than this many days are purged
    /// by the retention sweep at the start of every run.
    pub max_item_age_days: u32,

    /// Bounded concurrency for the per-blog fetch fan-out.
    pub fetch_concurrency: usize,

    /// Page size when enumerating blogs for the item-sync stage.
    pub blog_page_size: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedsync.db".to_string(),
            sync_interval_minutes: 60,
            startup_delay_secs: 30,
            fetch_timeout_secs: 20,
            max_items_per_blog: 50,
            max_item_age_days: 90,
            fetch_concurrency: 8,
            blog_page_size: 500,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to surface likely typos
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "sync_interval_minutes",
                "startup_delay_secs",
                "fetch_timeout_secs",
                "max_items_per_blog",
                "max_item_age_days",
                "fetch_concurrency",
                "blog_page_size",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            interval_minutes = config.sync_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
