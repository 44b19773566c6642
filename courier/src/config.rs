//! Runtime configuration.

use std::path::PathBuf;
use std::str::FromStr;

use job_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::channels::WakeupPolicy;
use crate::{Error, Result};

/// Configuration for the dispatch engine and its host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// SQLite URL for the delivery tracker and app log.
    pub database_url: String,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    /// Filter directive applied after logging starts, e.g. `courier=debug`.
    pub log_filter: Option<String>,
    /// Template language used when the app is unknown.
    pub default_language: String,
    /// Applies to every channel scheduler.
    pub scheduler: SchedulerConfig,
    pub wakeup: WakeupPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://courier.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("logs"),
            log_filter: None,
            default_language: "en".to_string(),
            scheduler: SchedulerConfig::default(),
            wakeup: WakeupPolicy::default(),
        }
    }
}

impl DispatchConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `COURIER_DATABASE_URL`
    /// - `COURIER_LOG_DIR`
    /// - `COURIER_LOG_FILTER`
    /// - `COURIER_DEFAULT_LANGUAGE`
    /// - `COURIER_SCHEDULER_MAX_ATTEMPTS`
    /// - `COURIER_SCHEDULER_INITIAL_RETRY_DELAY_MS`
    /// - `COURIER_SCHEDULER_MAX_RETRY_DELAY_MS`
    /// - `COURIER_SCHEDULER_MAX_BATCH_SIZE`
    /// - `COURIER_WAKEUP_DELAY_SECS`
    /// - `COURIER_WAKEUP_MIN_INTERVAL_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = var("COURIER_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = var("COURIER_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        config.log_filter = var("COURIER_LOG_FILTER");
        if let Some(language) = var("COURIER_DEFAULT_LANGUAGE") {
            config.default_language = language;
        }

        if let Some(v) = var("COURIER_SCHEDULER_MAX_ATTEMPTS") {
            config.scheduler.retry.max_attempts = parse("COURIER_SCHEDULER_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("COURIER_SCHEDULER_INITIAL_RETRY_DELAY_MS") {
            config.scheduler.retry.initial_retry_delay_ms =
                parse("COURIER_SCHEDULER_INITIAL_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = var("COURIER_SCHEDULER_MAX_RETRY_DELAY_MS") {
            config.scheduler.retry.max_retry_delay_ms =
                parse("COURIER_SCHEDULER_MAX_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = var("COURIER_SCHEDULER_MAX_BATCH_SIZE") {
            config.scheduler.max_batch_size = parse("COURIER_SCHEDULER_MAX_BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("COURIER_WAKEUP_DELAY_SECS") {
            config.wakeup.delay_secs = parse("COURIER_WAKEUP_DELAY_SECS", &v)?;
        }
        if let Some(v) = var("COURIER_WAKEUP_MIN_INTERVAL_SECS") {
            config.wakeup.min_interval_secs = parse("COURIER_WAKEUP_MIN_INTERVAL_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.retry.max_attempts == 0 {
            return Err(Error::config("COURIER_SCHEDULER_MAX_ATTEMPTS must be at least 1"));
        }
        if self.scheduler.max_batch_size == 0 {
            return Err(Error::config("COURIER_SCHEDULER_MAX_BATCH_SIZE must be at least 1"));
        }
        if self.scheduler.retry.initial_retry_delay_ms > self.scheduler.retry.max_retry_delay_ms {
            return Err(Error::config(concat!(
                "COURIER_SCHEDULER_INITIAL_RETRY_DELAY_MS must not exceed ",
                "COURIER_SCHEDULER_MAX_RETRY_DELAY_MS"
            )));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| Error::config(format!("Invalid {}: {}", key, e)))
}
