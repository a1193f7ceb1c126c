//! Tracker configuration from environment variables

use crate::buffer::BufferConfig;
use crate::error::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the tracker runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Queue length that triggers a flush
    pub flush_threshold: usize,

    /// Periodic flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Spawn a background flush after every add
    pub flush_on_add: bool,

    /// Write attempts per flush, first try included
    pub retry_attempts: u32,

    /// Delay before the first retry, doubled each attempt
    pub retry_base_ms: u64,

    /// Lifetime of cached stats in seconds
    pub cache_ttl_secs: u64,

    /// Broadcast capacity for buffer notifications
    pub event_channel: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            db_path: "keytally.db".to_string(),
            flush_threshold: 100,
            flush_interval_ms: 1_000,
            flush_on_add: true,
            retry_attempts: 3,
            retry_base_ms: 100,
            cache_ttl_secs: 300,
            event_channel: 256,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `KEYTALLY_DB_PATH` (default: keytally.db)
    /// - `KEYTALLY_FLUSH_THRESHOLD` (default: 100)
    /// - `KEYTALLY_FLUSH_INTERVAL_MS` (default: 1000)
    /// - `KEYTALLY_FLUSH_ON_ADD` (default: true)
    /// - `KEYTALLY_RETRY_ATTEMPTS` (default: 3)
    /// - `KEYTALLY_RETRY_BASE_MS` (default: 100)
    /// - `KEYTALLY_CACHE_TTL_SECS` (default: 300)
    /// - `KEYTALLY_EVENT_CHANNEL` (default: 256)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env::var("KEYTALLY_DB_PATH").unwrap_or(defaults.db_path),
            flush_threshold: parse_var("KEYTALLY_FLUSH_THRESHOLD", defaults.flush_threshold),
            flush_interval_ms: parse_var("KEYTALLY_FLUSH_INTERVAL_MS", defaults.flush_interval_ms),
            flush_on_add: parse_var("KEYTALLY_FLUSH_ON_ADD", defaults.flush_on_add),
            retry_attempts: parse_var("KEYTALLY_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_base_ms: parse_var("KEYTALLY_RETRY_BASE_MS", defaults.retry_base_ms),
            cache_ttl_secs: parse_var("KEYTALLY_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            event_channel: parse_var("KEYTALLY_EVENT_CHANNEL", defaults.event_channel),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "KEYTALLY_DB_PATH must not be empty".to_string(),
            ));
        }
        if self.flush_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "KEYTALLY_FLUSH_THRESHOLD must be > 0".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "KEYTALLY_FLUSH_INTERVAL_MS must be > 0".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "KEYTALLY_RETRY_ATTEMPTS must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            flush_threshold: self.flush_threshold,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            flush_on_add: self.flush_on_add,
            max_attempts: self.retry_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_ms),
            channel_capacity: self.event_channel,
            ..BufferConfig::default()
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️  Ignoring unparseable {}={:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
