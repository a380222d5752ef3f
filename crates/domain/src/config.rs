//! Runtime configuration
//!
//! Configuration is loaded from the environment (optionally via a `.env`
//! file) or from a TOML file. Every tunable has a default matching the
//! constants in [`crate::constants`], so an empty environment yields a
//! working configuration apart from the database URL.

use serde::Deserialize;

use crate::constants::{
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_LOOKAHEAD_DAYS, DEFAULT_LOOKBACK_DAYS,
    FAILURE_DISABLE_THRESHOLD, INITIAL_SYNC_EVENT_CAP, MAX_CALENDARS_PER_SYNC,
    MAX_PAGES_PER_CONTAINER, RECONCILE_BATCH_SIZE,
};
use crate::errors::{NotionFlowError, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

/// Database connection settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string (e.g. a Supabase pooler URL)
    pub url: String,
    /// Require TLS when connecting
    pub tls: bool,
}

/// Sync engine tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How far back remote events are fetched, in days
    pub lookback_days: i64,
    /// How far ahead remote events are fetched, in days
    pub lookahead_days: i64,
    /// Events per reconciler write batch
    pub batch_size: usize,
    /// Events synced inline before the rest is deferred to a background task
    pub initial_event_cap: usize,
    /// Remote calendars queried per sync (bounds CalDAV latency)
    pub max_calendars_per_sync: usize,
    /// Hard bound on pages fetched per container
    pub max_pages_per_container: usize,
    /// Consecutive failures before a credential is disabled
    pub failure_disable_threshold: u32,
    /// Timeout for outbound HTTP calls, in seconds
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            batch_size: RECONCILE_BATCH_SIZE,
            initial_event_cap: INITIAL_SYNC_EVENT_CAP,
            max_calendars_per_sync: MAX_CALENDARS_PER_SYNC,
            max_pages_per_container: MAX_PAGES_PER_CONTAINER,
            failure_disable_threshold: FAILURE_DISABLE_THRESHOLD,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Reads a `.env` file when present. `NOTIONFLOW_DATABASE_URL` is
    /// required; sync tunables fall back to their defaults unless the
    /// matching `NOTIONFLOW_SYNC_*` variable is set.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let url = std::env::var("NOTIONFLOW_DATABASE_URL")
            .map_err(|_| NotionFlowError::Config("NOTIONFLOW_DATABASE_URL not set".into()))?;
        let tls = std::env::var("NOTIONFLOW_DATABASE_TLS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut sync = SyncConfig::default();
        if let Some(value) = env_parse("NOTIONFLOW_SYNC_BATCH_SIZE")? {
            sync.batch_size = value;
        }
        if let Some(value) = env_parse("NOTIONFLOW_SYNC_INITIAL_EVENT_CAP")? {
            sync.initial_event_cap = value;
        }
        if let Some(value) = env_parse("NOTIONFLOW_SYNC_LOOKBACK_DAYS")? {
            sync.lookback_days = value;
        }
        if let Some(value) = env_parse("NOTIONFLOW_SYNC_LOOKAHEAD_DAYS")? {
            sync.lookahead_days = value;
        }
        if let Some(value) = env_parse("NOTIONFLOW_SYNC_HTTP_TIMEOUT_SECS")? {
            sync.http_timeout_secs = value;
        }

        Ok(Self { database: DatabaseConfig { url, tls }, sync })
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NotionFlowError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            NotionFlowError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| NotionFlowError::Config(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(None),
    }
}
