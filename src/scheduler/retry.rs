//! Retry policy for failed publish attempts
//!
//! The queue keeps the attempt budget on each item (`max_attempts`); this
//! module decides, after a failure, whether the item goes back to `pending`
//! and when. Which failures are worth retrying is pluggable through
//! [`FailureClassifier`]. The default, [`RetryClassification::RetryAll`],
//! retries every failure the same way.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::DispatcherConfig;
use crate::models::{QueueItem, DEFAULT_MAX_ATTEMPTS};
use crate::publisher::{FailureKind, PublishError};

/// Decides whether a failure may consume more of the retry budget
pub trait FailureClassifier: Send + Sync {
    fn should_retry(&self, error: &PublishError) -> bool;
}

/// Built-in classification schemes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClassification {
    /// Every failure is retried until the budget runs out
    #[default]
    RetryAll,
    /// Permanent failures fail immediately; anything else is retried
    TransientOnly,
}

impl FailureClassifier for RetryClassification {
    fn should_retry(&self, error: &PublishError) -> bool {
        match self {
            Self::RetryAll => true,
            Self::TransientOnly => error.kind != FailureKind::Permanent,
        }
    }
}

/// What to do with an item after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending`, due again at the given instant
    RetryAt(DateTime<Utc>),
    /// Terminal failure
    GiveUp,
}

/// Backoff and classification for publish retries
#[derive(Clone)]
pub struct RetryPolicy {
    /// Budget stamped onto newly enqueued items
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Cap on the grown delay
    pub max_delay: Duration,
    classifier: Arc<dyn FailureClassifier>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_ATTEMPTS, Duration::minutes(5))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts, every failure retried
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            backoff_multiplier: 1.0,
            max_delay: delay,
            classifier: Arc::new(RetryClassification::RetryAll),
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        let base_delay = Duration::seconds(config.retry_backoff_secs as i64);
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay,
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_delay: Duration::seconds(config.max_backoff_secs as i64).max(base_delay),
            classifier: Arc::new(config.retry_classification),
        }
    }

    /// Replace the failure classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Delay after the given number of attempts already made (1-based)
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        if attempts_made <= 1 || self.backoff_multiplier <= 1.0 {
            return self.base_delay;
        }

        let exponent = (attempts_made - 1).min(32) as i32;
        let grown_ms =
            self.base_delay.num_milliseconds() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = grown_ms.min(self.max_delay.num_milliseconds() as f64);
        Duration::milliseconds(capped_ms as i64)
    }

    /// Decide the fate of an item whose current attempt just failed.
    /// `item.attempt_count` already includes that attempt.
    pub fn decide(&self, item: &QueueItem, error: &PublishError, now: DateTime<Utc>) -> RetryDecision {
        if item.attempt_count >= item.max_attempts || !self.classifier.should_retry(error) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAt(now + self.delay_for(item.attempt_count))
    }
}
