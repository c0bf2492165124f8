use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub worker_count: usize,
    pub availability_timeout_secs: i64,
    pub scan_interval_secs: u64,
    pub max_retries: i32,
    pub base_backoff_ms: i64,
    pub max_backoff_secs: i64,
    pub default_sync_horizon_days: i32,
    pub default_generation_horizon_days: i32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_COUNT must be a valid number")?,
            availability_timeout_secs: env::var("AVAILABILITY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("AVAILABILITY_TIMEOUT_SECS must be a valid number")?,
            scan_interval_secs: env::var("SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("SCAN_INTERVAL_SECS must be a valid number")?,
            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("MAX_RETRIES must be a valid number")?,
            base_backoff_ms: env::var("BASE_BACKOFF_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("BASE_BACKOFF_MS must be a valid number")?,
            max_backoff_secs: env::var("MAX_BACKOFF_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("MAX_BACKOFF_SECS must be a valid number")?,
            default_sync_horizon_days: env::var("DEFAULT_SYNC_HORIZON_DAYS")
                .unwrap_or_else(|_| "14".to_string())
                .parse()
                .context("DEFAULT_SYNC_HORIZON_DAYS must be a valid number")?,
            default_generation_horizon_days: env::var("DEFAULT_GENERATION_HORIZON_DAYS")
                .unwrap_or_else(|_| "365".to_string())
                .parse()
                .context("DEFAULT_GENERATION_HORIZON_DAYS must be a valid number")?,
        })
    }
}
