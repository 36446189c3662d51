//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::types::DEFAULT_TAG_DELIMITER;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Root for stored CSV copies (`imports/`) and ingested files (`files/`)
    pub storage_dir: PathBuf,

    /// Rows (or undo deletions) per run before pausing; 0 = unbounded
    pub batch_size: u32,

    /// How often `serve` looks for queued imports
    pub poll_interval: Duration,

    /// Longest a single `serve` run may take before it is interrupted
    pub max_run_time: Option<Duration>,

    /// Timeout for downloading remote files
    pub http_timeout: Duration,

    /// Delimiter written into tag maps that omit one
    pub tag_delimiter: String,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        _ => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let storage_dir = std::env::var("IMPORT_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./storage"));

        let batch_size = parse_var("IMPORT_BATCH_SIZE", 0u32)?;
        let poll_interval = Duration::from_secs(parse_var("IMPORT_POLL_INTERVAL_SECS", 5u64)?);
        let http_timeout = Duration::from_secs(parse_var("IMPORT_HTTP_TIMEOUT_SECS", 30u64)?);
        // 0 = no limit
        let max_run_time = match parse_var("IMPORT_MAX_RUN_SECS", 0u64)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        if poll_interval.is_zero() {
            anyhow::bail!("IMPORT_POLL_INTERVAL_SECS must be at least 1");
        }

        let tag_delimiter = std::env::var("CSV_IMPORT_TAG_DELIMITER")
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_TAG_DELIMITER.to_string());

        Ok(Self {
            database_url,
            storage_dir,
            batch_size,
            poll_interval,
            max_run_time,
            http_timeout,
            tag_delimiter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_batch_size_defaults_to_unbounded() {
        std::env::remove_var("IMPORT_BATCH_SIZE");
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.batch_size, 0);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_run_time, None);
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_rejects_garbage_batch_size() {
        std::env::set_var("IMPORT_BATCH_SIZE", "lots");
        std::env::set_var("DATABASE_URL", "postgres://test");

        assert!(Config::from_env().is_err());

        std::env::remove_var("IMPORT_BATCH_SIZE");
    }

    #[test]
    fn test_parse_var_uses_default_when_unset() {
        let value: u32 = parse_var("CSV_IMPORT_TEST_SURELY_UNSET", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parse_var_reads_value() {
        std::env::set_var("CSV_IMPORT_TEST_POLL", " 12 ");
        let value: u64 = parse_var("CSV_IMPORT_TEST_POLL", 5).unwrap();
        assert_eq!(value, 12);
        std::env::remove_var("CSV_IMPORT_TEST_POLL");
    }
}
