//! Repository abstraction for scheduling state
//!
//! Business logic (dispatcher, coordinator, analytics) talks to the
//! [`SchedulingStore`] trait only, so the backing database can be swapped and
//! tests can run against an in-memory SQLite instance.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │      SchedulingCoordinator / QueueDispatcher / Analytics    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SchedulingStore trait                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             SqliteStore (file-backed or in-memory)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    BestTimeRecommendation, EngagementMetrics, PlatformPost, PostStatus, QueueItem,
    QueueSettings, ScheduledPost,
};

// ============================================================================
// Errors
// ============================================================================

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row in '{table}': {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            reason: reason.into(),
        }
    }

    /// Busy/locked database and poisoned locks may clear on retry
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================================
// Query and update types
// ============================================================================

/// Filter for listing scheduled posts. Soft-deleted posts are never returned.
#[derive(Debug, Clone, Default)]
pub struct PostQuery {
    pub tenant_id: String,
    pub account_id: Option<String>,
    /// Empty means any status
    pub statuses: Vec<PostStatus>,
    /// Inclusive lower bound on `scheduled_at`
    pub scheduled_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `scheduled_at`
    pub scheduled_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl PostQuery {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn status(mut self, status: PostStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.scheduled_from = Some(from);
        self.scheduled_to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome of one claimed publish attempt, applied atomically to the
/// queue item and its platform post
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResolution {
    /// The platform accepted the post
    Published {
        external_id: String,
        url: String,
        at: DateTime<Utc>,
    },
    /// The attempt failed and the item goes back to `pending`
    Retry {
        error: String,
        retry_at: DateTime<Utc>,
    },
    /// The attempt failed and no retry will follow
    Failed { error: String, at: DateTime<Utc> },
}

/// Queue item counts for one tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Persisted performance score, the comparison set for percentile ranks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub platform_post_id: String,
    pub tenant_id: String,
    pub platform: String,
    pub group_key: String,
    pub score: f64,
    pub label: String,
    pub percentile_rank: u8,
    pub scored_at: DateTime<Utc>,
}

// ============================================================================
// Repository trait
// ============================================================================

/// Persistence operations consumed by the scheduling core
pub trait SchedulingStore: Send + Sync {
    // --- scheduled posts ---------------------------------------------------

    fn insert_post(&self, post: &ScheduledPost) -> StorageResult<()>;

    /// Overwrite every mutable column of an existing post
    fn update_post(&self, post: &ScheduledPost) -> StorageResult<()>;

    /// Fetch by id, including soft-deleted rows
    fn get_post(&self, post_id: &str) -> StorageResult<Option<ScheduledPost>>;

    fn list_posts(&self, query: &PostQuery) -> StorageResult<Vec<ScheduledPost>>;

    /// Tenants owning at least one live post
    fn tenants(&self) -> StorageResult<Vec<String>>;

    /// Compare-and-set the post status. Returns `false` when the current
    /// status is not one of `from`.
    fn transition_post(
        &self,
        post_id: &str,
        from: &[PostStatus],
        to: PostStatus,
        error_message: Option<&str>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    // --- platform posts ----------------------------------------------------

    /// Insert or replace the record keyed by (scheduled post, platform)
    fn upsert_platform_post(&self, platform_post: &PlatformPost) -> StorageResult<()>;

    fn get_platform_post(&self, platform_post_id: &str) -> StorageResult<Option<PlatformPost>>;

    fn platform_posts_for(&self, post_id: &str) -> StorageResult<Vec<PlatformPost>>;

    /// Published records never synced or last synced before `stale_before`
    fn platform_posts_needing_sync(
        &self,
        tenant_id: &str,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<PlatformPost>>;

    fn update_platform_metrics(
        &self,
        platform_post_id: &str,
        metrics: &EngagementMetrics,
        synced_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Published records with a publish timestamp, optionally for one platform
    fn published_platform_posts(
        &self,
        tenant_id: &str,
        platform: Option<&str>,
    ) -> StorageResult<Vec<PlatformPost>>;

    // --- queue items -------------------------------------------------------

    /// Insert, or reset an existing (post, platform) item back to `pending`
    /// with a fresh attempt budget. Completed and in-flight items are left
    /// untouched and `false` is returned.
    fn upsert_queue_item(&self, item: &QueueItem) -> StorageResult<bool>;

    fn get_queue_item(&self, item_id: &str) -> StorageResult<Option<QueueItem>>;

    fn queue_items_for(&self, post_id: &str) -> StorageResult<Vec<QueueItem>>;

    /// Pending items with `scheduled_for <= now` and attempts left, oldest first.
    /// Items of posts that cannot publish (unapproved, rejected, cancelled, deleted) are excluded.
    fn due_queue_items(&self, now: DateTime<Utc>, limit: usize) -> StorageResult<Vec<QueueItem>>;

    /// Atomic `pending -> processing` claim. Consumes one attempt and marks
    /// the platform post `publishing`, creating it if needed. Exactly one
    /// concurrent caller wins; the others get `false`.
    fn claim_queue_item(
        &self,
        item_id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Apply the outcome of a claimed attempt to the queue item and the
    /// platform post in one transaction. Returns `false` (and changes
    /// nothing) when the item is no longer `processing`.
    fn resolve_attempt(
        &self,
        item: &QueueItem,
        tenant_id: &str,
        resolution: &AttemptResolution,
    ) -> StorageResult<bool>;

    /// Items claimed before `started_before` and still `processing`
    fn stuck_queue_items(&self, started_before: DateTime<Utc>) -> StorageResult<Vec<QueueItem>>;

    /// Fail every pending item of a post with `reason`. Returns the count.
    fn cancel_queue_items(
        &self,
        post_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<usize>;

    fn queue_depth(&self, tenant_id: &str) -> StorageResult<QueueDepth>;

    // --- queue settings ----------------------------------------------------

    fn get_queue_settings(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> StorageResult<Option<QueueSettings>>;

    fn save_queue_settings(&self, settings: &QueueSettings) -> StorageResult<()>;

    // --- best-time cache ---------------------------------------------------

    fn upsert_best_time(&self, recommendation: &BestTimeRecommendation) -> StorageResult<()>;

    fn best_times(
        &self,
        tenant_id: &str,
        platform: Option<&str>,
    ) -> StorageResult<Vec<BestTimeRecommendation>>;

    /// Drop the cache for a tenant. Returns the number of rows removed.
    fn clear_best_times(&self, tenant_id: &str) -> StorageResult<usize>;

    // --- performance scores ------------------------------------------------

    fn record_score(&self, record: &ScoreRecord) -> StorageResult<()>;

    /// Scores in the same (tenant, platform, group), optionally excluding one post
    fn historical_scores(
        &self,
        tenant_id: &str,
        platform: &str,
        group_key: &str,
        exclude_platform_post: Option<&str>,
    ) -> StorageResult<Vec<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_query_builder() {
        let query = PostQuery::for_tenant("t1")
            .account("acc")
            .status(PostStatus::Scheduled)
            .limit(5);
        assert_eq!(query.tenant_id, "t1");
        assert_eq!(query.account_id.as_deref(), Some("acc"));
        assert_eq!(query.statuses, vec![PostStatus::Scheduled]);
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_storage_error_recoverable() {
        assert!(!StorageError::LockPoisoned.is_recoverable());
        assert!(!StorageError::corrupt("queue_items", "bad status").is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr");
        assert!(StorageError::from(io).is_recoverable());
    }
}
