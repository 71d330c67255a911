//! Configuration management for postqueue
//!
//! Configuration comes from built-in defaults, a TOML file, or `POSTQUEUE_*`
//! environment variables. Every section is optional in the file; missing
//! keys keep their defaults.

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::retry::RetryClassification;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub scheduling: SchedulingConfig,
    pub scoring: ScoringConfig,
    pub trigger: TriggerConfig,
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/postqueue.db"),
        }
    }
}

/// Queue dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Attempt budget for new queue items
    pub max_attempts: u32,

    /// Delay before a failed item is due again
    pub retry_backoff_secs: u64,

    /// Growth factor per attempt (1.0 = fixed delay)
    pub backoff_multiplier: f64,

    /// Upper bound on the grown delay
    pub max_backoff_secs: u64,

    /// Time budget for one platform publish call
    pub publish_timeout_secs: u64,

    /// Items `processing` longer than this are reclaimed by the watchdog
    pub stuck_after_secs: u64,

    /// Posts dispatched concurrently within one pass
    pub max_concurrent_posts: usize,

    /// Maximum due items pulled per pass
    pub batch_size: usize,

    /// Published records older than this are re-synced
    pub metrics_stale_after_secs: u64,

    /// Which failures consume retry budget
    pub retry_classification: RetryClassification,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_secs: 300,
            backoff_multiplier: 1.0,
            max_backoff_secs: 3600,
            publish_timeout_secs: 30,
            stuck_after_secs: 600,
            max_concurrent_posts: 4,
            batch_size: 500,
            metrics_stale_after_secs: 3600,
            retry_classification: RetryClassification::RetryAll,
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    #[must_use]
    pub fn stuck_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stuck_after_secs as i64)
    }

    #[must_use]
    pub fn metrics_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.metrics_stale_after_secs as i64)
    }
}

/// Slot calculation and conflict detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Posts on the same platform closer than this conflict
    pub conflict_window_minutes: i64,

    /// Offset of the local posting clock from UTC
    pub utc_offset_minutes: i32,

    /// Hour used when no recommendation exists
    pub fallback_hour: u32,

    /// Days scanned ahead for the next enabled slot
    pub search_horizon_days: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            conflict_window_minutes: 15,
            utc_offset_minutes: 0,
            fallback_hour: 10,
            search_horizon_days: 7,
        }
    }
}

impl SchedulingConfig {
    /// Local timezone for slot arithmetic
    pub fn local_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .with_context(|| format!("utc_offset_minutes out of range: {}", self.utc_offset_minutes))
    }

    #[must_use]
    pub fn conflict_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.conflict_window_minutes)
    }
}

/// Performance scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Percentile at or above which a post is a high performer
    pub high_performer_percentile: u8,

    /// Percentile at or above which a post is average
    pub average_percentile: u8,

    pub reach_ceiling: f64,
    pub impressions_ceiling: f64,
    pub saves_ceiling: f64,
    pub shares_ceiling: f64,
    pub comments_ceiling: f64,

    /// Engagement rate (percent) that maps to a full score
    pub engagement_rate_ceiling: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            high_performer_percentile: 75,
            average_percentile: 40,
            reach_ceiling: 50_000.0,
            impressions_ceiling: 100_000.0,
            saves_ceiling: 1_000.0,
            shares_ceiling: 500.0,
            comments_ceiling: 500.0,
            engagement_rate_ceiling: 10.0,
        }
    }
}

/// Periodic trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Seconds between dispatch passes
    pub tick_interval_secs: u64,

    /// Run a metrics sync every N ticks (0 disables)
    pub metrics_sync_every_ticks: u64,

    /// Rebuild best-time recommendations every N ticks (0 disables)
    pub best_time_refresh_every_ticks: u64,

    /// Dispatch immediately instead of waiting one interval
    pub run_on_startup: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            metrics_sync_every_ticks: 60,
            best_time_refresh_every_ticks: 1440,
            run_on_startup: true,
        }
    }
}

impl TriggerConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let retry_classification = match std::env::var("POSTQUEUE_RETRY_CLASSIFICATION") {
            Ok(value) => serde_json::from_value(serde_json::Value::String(value.clone()))
                .with_context(|| format!("Invalid POSTQUEUE_RETRY_CLASSIFICATION: {value}"))?,
            Err(_) => defaults.dispatcher.retry_classification,
        };

        let config = Self {
            database: DatabaseConfig {
                sqlite_path: std::env::var("POSTQUEUE_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.database.sqlite_path),
            },
            dispatcher: DispatcherConfig {
                max_attempts: env_or("POSTQUEUE_MAX_ATTEMPTS", defaults.dispatcher.max_attempts),
                retry_backoff_secs: env_or(
                    "POSTQUEUE_RETRY_BACKOFF_SECS",
                    defaults.dispatcher.retry_backoff_secs,
                ),
                backoff_multiplier: env_or(
                    "POSTQUEUE_BACKOFF_MULTIPLIER",
                    defaults.dispatcher.backoff_multiplier,
                ),
                max_backoff_secs: env_or(
                    "POSTQUEUE_MAX_BACKOFF_SECS",
                    defaults.dispatcher.max_backoff_secs,
                ),
                publish_timeout_secs: env_or(
                    "POSTQUEUE_PUBLISH_TIMEOUT_SECS",
                    defaults.dispatcher.publish_timeout_secs,
                ),
                stuck_after_secs: env_or(
                    "POSTQUEUE_STUCK_AFTER_SECS",
                    defaults.dispatcher.stuck_after_secs,
                ),
                max_concurrent_posts: env_or(
                    "POSTQUEUE_MAX_CONCURRENT_POSTS",
                    defaults.dispatcher.max_concurrent_posts,
                ),
                batch_size: env_or("POSTQUEUE_BATCH_SIZE", defaults.dispatcher.batch_size),
                metrics_stale_after_secs: env_or(
                    "POSTQUEUE_METRICS_STALE_AFTER_SECS",
                    defaults.dispatcher.metrics_stale_after_secs,
                ),
                retry_classification,
            },
            scheduling: SchedulingConfig {
                conflict_window_minutes: env_or(
                    "POSTQUEUE_CONFLICT_WINDOW_MINUTES",
                    defaults.scheduling.conflict_window_minutes,
                ),
                utc_offset_minutes: env_or(
                    "POSTQUEUE_UTC_OFFSET_MINUTES",
                    defaults.scheduling.utc_offset_minutes,
                ),
                fallback_hour: env_or("POSTQUEUE_FALLBACK_HOUR", defaults.scheduling.fallback_hour),
                search_horizon_days: env_or(
                    "POSTQUEUE_SEARCH_HORIZON_DAYS",
                    defaults.scheduling.search_horizon_days,
                ),
            },
            scoring: ScoringConfig {
                high_performer_percentile: env_or(
                    "POSTQUEUE_HIGH_PERFORMER_PERCENTILE",
                    defaults.scoring.high_performer_percentile,
                ),
                average_percentile: env_or(
                    "POSTQUEUE_AVERAGE_PERCENTILE",
                    defaults.scoring.average_percentile,
                ),
                ..defaults.scoring
            },
            trigger: TriggerConfig {
                tick_interval_secs: env_or(
                    "POSTQUEUE_TICK_INTERVAL_SECS",
                    defaults.trigger.tick_interval_secs,
                ),
                ..defaults.trigger
            },
            logging: LoggingConfig {
                level: std::env::var("POSTQUEUE_LOG_LEVEL").unwrap_or(defaults.logging.level),
                format: std::env::var("POSTQUEUE_LOG_FORMAT").unwrap_or(defaults.logging.format),
            },
        };

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.dispatcher.publish_timeout_secs == 0 {
            anyhow::bail!("publish_timeout_secs must be greater than 0");
        }

        if self.dispatcher.stuck_after_secs <= self.dispatcher.publish_timeout_secs {
            anyhow::bail!("stuck_after_secs must exceed publish_timeout_secs");
        }

        if self.dispatcher.max_concurrent_posts == 0 || self.dispatcher.batch_size == 0 {
            anyhow::bail!("max_concurrent_posts and batch_size must be greater than 0");
        }

        if self.dispatcher.backoff_multiplier < 1.0 {
            anyhow::bail!("backoff_multiplier must be at least 1.0");
        }

        if self.scheduling.conflict_window_minutes < 0 {
            anyhow::bail!("conflict_window_minutes must not be negative");
        }

        if self.scheduling.fallback_hour > 23 {
            anyhow::bail!("fallback_hour must be 0-23");
        }

        if self.scheduling.search_horizon_days == 0 {
            anyhow::bail!("search_horizon_days must be greater than 0");
        }

        self.scheduling.local_offset()?;

        let scoring = &self.scoring;
        if scoring.high_performer_percentile > 100
            || scoring.average_percentile > scoring.high_performer_percentile
        {
            anyhow::bail!("percentile thresholds must satisfy average <= high <= 100");
        }

        let ceilings = [
            scoring.reach_ceiling,
            scoring.impressions_ceiling,
            scoring.saves_ceiling,
            scoring.shares_ceiling,
            scoring.comments_ceiling,
            scoring.engagement_rate_ceiling,
        ];
        if ceilings.iter().any(|c| !c.is_finite() || *c <= 0.0) {
            anyhow::bail!("scoring ceilings must be positive");
        }

        if self.trigger.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than 0");
        }

        Ok(())
    }
}
