//! Service configuration resolved from `SYNC_*` environment variables.

use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_FEED_URL: &str = "https://wp.webspark.dev/wp-api/products";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote feed endpoint.
    pub feed_url: String,
    /// Connect/read timeout for every HTTP call.
    pub http_timeout_secs: u64,
    /// Total fetch attempts before the pass fails terminally.
    pub max_fetch_attempts: u32,
    /// Base backoff between fetch attempts; grows exponentially with jitter.
    pub fetch_backoff_ms: u64,
    /// Scheduler cadence.
    pub interval_secs: u64,
    /// SQLite database path for the local catalog.
    pub db_path: String,
    /// Directory that holds stored media files.
    pub media_dir: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            feed_url: env_opt("SYNC_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            http_timeout_secs: env_parse("SYNC_HTTP_TIMEOUT_SECS", 5u64),
            max_fetch_attempts: env_parse("SYNC_MAX_RETRIES", 5u32),
            fetch_backoff_ms: env_parse("SYNC_BACKOFF_MS", 200u64),
            interval_secs: env_parse("SYNC_INTERVAL_SECS", 3600u64),
            db_path: env_opt("SYNC_DB_PATH").unwrap_or_else(|| "feedsync.db".to_string()),
            media_dir: env_opt("SYNC_MEDIA_DIR").unwrap_or_else(|| "media".to_string()),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            http_timeout_secs: 5,
            max_fetch_attempts: 5,
            fetch_backoff_ms: 200,
            interval_secs: 3600,
            db_path: "feedsync.db".to_string(),
            media_dir: "media".to_string(),
        }
    }
}
