//! Core data structures for the scheduling and publishing engine
//!
//! [`ScheduledPost`] is the aggregate root. [`PlatformPost`] and [`QueueItem`]
//! are owned by it, one of each per target platform. [`QueueSettings`] and
//! [`BestTimeRecommendation`] are account/tenant scoped and independent of any
//! single post.

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Default number of publish attempts per queue item
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default posts-per-day cap for freshly created queue settings
pub const DEFAULT_POSTS_PER_DAY: u32 = 3;

/// Error returned when a stored status string is not a known variant
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} value: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Status enums
// ============================================================================

/// Lifecycle status of a [`ScheduledPost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn all() -> [PostStatus; 6] {
        [
            Self::Draft,
            Self::Scheduled,
            Self::Publishing,
            Self::Published,
            Self::Failed,
            Self::Cancelled,
        ]
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Forward moves are monotonic. The only backward moves are the explicit
    /// resets performed by reschedule (`failed -> scheduled`) and by editing a
    /// post back into a draft.
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Draft, Publishing)
                | (Draft, Cancelled)
                | (Scheduled, Draft)
                | (Scheduled, Scheduled)
                | (Scheduled, Publishing)
                | (Scheduled, Cancelled)
                | (Publishing, Published)
                | (Publishing, Failed)
                | (Publishing, Cancelled)
                | (Failed, Scheduled)
                | (Failed, Cancelled)
        )
    }

    /// Terminal from the dispatcher's point of view
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for PostStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "draft" => Self::Draft,
            "scheduled" => Self::Scheduled,
            "publishing" => Self::Publishing,
            "published" => Self::Published,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            other => return Err(ParseEnumError::new("post status", other)),
        })
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval gate on a [`ScheduledPost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Whether the approval requirement allows publishing
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::NotRequired | Self::Approved)
    }
}

impl FromStr for ApprovalStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "not_required" => Self::NotRequired,
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            other => return Err(ParseEnumError::new("approval status", other)),
        })
    }
}

/// Status of a single platform's publication record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformPostStatus {
    Pending,
    Publishing,
    Published,
    Failed,
}

impl PlatformPostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PlatformPostStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "publishing" => Self::Publishing,
            "published" => Self::Published,
            "failed" => Self::Failed,
            other => return Err(ParseEnumError::new("platform post status", other)),
        })
    }
}

/// Status of a dispatch work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => return Err(ParseEnumError::new("queue status", other)),
        })
    }
}

// ============================================================================
// Scheduled Post
// ============================================================================

/// Reference to a media attachment owned by the content store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
        }
    }
}

/// One piece of content intended for one or more platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub tenant_id: String,
    /// Account whose queue settings govern this post
    pub account_id: String,
    pub content: String,
    /// Target platform identifiers, in the order the caller gave them
    pub platforms: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    /// Opaque per-post options forwarded to the publisher
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: PostStatus,
    pub approval_status: ApprovalStatus,
    pub error_message: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ScheduledPost {
    /// Create a draft post with a fresh identifier
    pub fn new_draft(
        tenant_id: impl Into<String>,
        account_id: impl Into<String>,
        content: impl Into<String>,
        platforms: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            account_id: account_id.into(),
            content: content.into(),
            platforms: dedup_platforms(platforms),
            media: Vec::new(),
            options: serde_json::Map::new(),
            scheduled_at: None,
            status: PostStatus::Draft,
            approval_status: ApprovalStatus::NotRequired,
            error_message: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            published_at: None,
            deleted_at: None,
        }
    }

    /// Whether the dispatcher may still publish this post
    pub fn is_publishable(&self) -> bool {
        self.deleted_at.is_none()
            && matches!(self.status, PostStatus::Scheduled | PostStatus::Publishing)
            && self.approval_status.is_satisfied()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn targets(&self, platform: &str) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }
}

/// Remove duplicate platform identifiers, keeping first occurrence order
pub fn dedup_platforms(platforms: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    platforms
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect()
}

// ============================================================================
// Engagement metrics
// ============================================================================

/// Engagement numbers reported by a platform for one published post
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    #[serde(default)]
    pub saves: Option<u64>,
    #[serde(default)]
    pub reach: Option<u64>,
    #[serde(default)]
    pub impressions: Option<u64>,
}

impl EngagementMetrics {
    pub fn interactions(&self) -> u64 {
        self.likes
            .saturating_add(self.comments)
            .saturating_add(self.shares)
            .saturating_add(self.saves.unwrap_or(0))
    }

    /// Interactions per audience member, as a percentage.
    ///
    /// The audience is the larger of reach and impressions, floored at 1.
    pub fn engagement_rate(&self) -> f64 {
        let audience = self
            .reach
            .unwrap_or(0)
            .max(self.impressions.unwrap_or(0))
            .max(1);
        self.interactions() as f64 / audience as f64 * 100.0
    }
}

// ============================================================================
// Platform Post
// ============================================================================

/// Per-platform publication record owned by one [`ScheduledPost`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformPost {
    pub id: String,
    pub scheduled_post_id: String,
    pub tenant_id: String,
    pub platform: String,
    pub status: PlatformPostStatus,
    pub external_post_id: Option<String>,
    pub external_url: Option<String>,
    pub metrics: Option<EngagementMetrics>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl PlatformPost {
    pub fn new(post: &ScheduledPost, platform: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scheduled_post_id: post.id.clone(),
            tenant_id: post.tenant_id.clone(),
            platform: platform.into(),
            status: PlatformPostStatus::Pending,
            external_post_id: None,
            external_url: None,
            metrics: None,
            last_synced_at: None,
            error_message: None,
            published_at: None,
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == PlatformPostStatus::Published && self.external_post_id.is_some()
    }
}

// ============================================================================
// Queue Item
// ============================================================================

/// Dispatch work unit: "publish this post to this platform"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub scheduled_post_id: String,
    pub platform: String,
    pub status: QueueStatus,
    pub scheduled_for: DateTime<Utc>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// When the current `processing` claim was taken
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(
        post_id: impl Into<String>,
        platform: impl Into<String>,
        scheduled_for: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scheduled_post_id: post_id.into(),
            platform: platform.into(),
            status: QueueStatus::Pending,
            scheduled_for,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    pub fn can_retry(&self) -> bool {
        self.status != QueueStatus::Completed && self.attempt_count < self.max_attempts
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_for <= now
    }

    /// Still waiting for or undergoing a publish attempt
    pub fn is_outstanding(&self) -> bool {
        match self.status {
            QueueStatus::Pending | QueueStatus::Processing => true,
            QueueStatus::Completed | QueueStatus::Failed => false,
        }
    }
}

// ============================================================================
// Queue Settings
// ============================================================================

/// Per-account posting cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub tenant_id: String,
    pub account_id: String,
    pub platform: String,
    pub enabled: bool,
    /// Times of day, kept in ascending order
    #[serde(with = "hhmm_list")]
    pub posting_times: Vec<NaiveTime>,
    #[serde(with = "sunday_based_days")]
    pub days_enabled: Vec<Weekday>,
    pub posts_per_day: u32,
}

impl QueueSettings {
    /// Sort posting times and weekday list, dropping duplicates
    pub fn normalize(mut self) -> Self {
        self.posting_times.sort();
        self.posting_times.dedup();
        self.days_enabled
            .sort_by_key(|d| d.num_days_from_sunday());
        self.days_enabled.dedup();
        self
    }

    pub fn is_day_enabled(&self, day: Weekday) -> bool {
        self.days_enabled.contains(&day)
    }
}

/// Parse a `HH:MM` time-of-day string
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Format a time of day as `HH:MM`
pub fn format_hhmm(time: &NaiveTime) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

/// Weekday from a Sunday-based index (0 = Sunday .. 6 = Saturday)
pub fn weekday_from_sunday(index: u32) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

mod hhmm_list {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(times: &[NaiveTime], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(times.iter().map(super::format_hhmm))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NaiveTime>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.iter()
            .map(|t| {
                super::parse_hhmm(t)
                    .ok_or_else(|| D::Error::custom(format!("invalid time '{t}', expected HH:MM")))
            })
            .collect()
    }
}

mod sunday_based_days {
    use chrono::Weekday;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(days: &[Weekday], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(days.iter().map(|d| d.num_days_from_sunday()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Weekday>, D::Error> {
        let raw = Vec::<u32>::deserialize(d)?;
        raw.into_iter()
            .map(|n| {
                super::weekday_from_sunday(n)
                    .ok_or_else(|| D::Error::custom(format!("invalid weekday {n}, expected 0-6")))
            })
            .collect()
    }
}

// ============================================================================
// Best-time recommendation
// ============================================================================

/// Rebuildable engagement aggregate for one (tenant, platform, weekday, hour) cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTimeRecommendation {
    pub tenant_id: String,
    pub platform: String,
    pub weekday: Weekday,
    pub hour: u32,
    /// 0-100
    pub engagement_score: f64,
    pub sample_size: u32,
    pub avg_engagement_rate: f64,
    pub calculated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_post_status_round_trip_strings() {
        for status in PostStatus::all() {
            assert_eq!(status.as_str().parse::<PostStatus>().unwrap(), status);
        }
        assert!("archived".parse::<PostStatus>().is_err());
    }

    #[test]
    fn test_post_status_transitions() {
        assert!(PostStatus::Draft.can_transition_to(PostStatus::Scheduled));
        assert!(PostStatus::Publishing.can_transition_to(PostStatus::Failed));
        assert!(PostStatus::Failed.can_transition_to(PostStatus::Scheduled));
        assert!(!PostStatus::Published.can_transition_to(PostStatus::Scheduled));
        assert!(!PostStatus::Cancelled.can_transition_to(PostStatus::Scheduled));
        assert!(!PostStatus::Published.can_transition_to(PostStatus::Failed));
    }

    #[test]
    fn test_dedup_platforms_keeps_order() {
        let platforms = dedup_platforms(vec![
            "Facebook".into(),
            "instagram".into(),
            "facebook".into(),
            " ".into(),
        ]);
        assert_eq!(platforms, vec!["facebook", "instagram"]);
    }

    #[test]
    fn test_publishable_requires_approval() {
        let mut post = ScheduledPost::new_draft("t1", "a1", "hello", vec!["facebook".into()], now());
        assert!(!post.is_publishable());

        post.status = PostStatus::Scheduled;
        assert!(post.is_publishable());

        post.approval_status = ApprovalStatus::Pending;
        assert!(!post.is_publishable());

        post.approval_status = ApprovalStatus::Approved;
        post.deleted_at = Some(now());
        assert!(!post.is_publishable());
    }

    #[test]
    fn test_engagement_rate() {
        let metrics = EngagementMetrics {
            likes: 500,
            comments: 50,
            shares: 30,
            reach: Some(20_000),
            ..Default::default()
        };
        assert!((metrics.engagement_rate() - 2.9).abs() < 1e-9);

        let empty = EngagementMetrics::default();
        assert_eq!(empty.engagement_rate(), 0.0);
    }

    #[test]
    fn test_engagement_rate_uses_larger_audience() {
        let metrics = EngagementMetrics {
            likes: 100,
            reach: Some(1_000),
            impressions: Some(4_000),
            ..Default::default()
        };
        assert!((metrics.engagement_rate() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_interactions_saturate() {
        let metrics = EngagementMetrics {
            likes: u64::MAX,
            comments: 10,
            shares: 10,
            saves: Some(u64::MAX),
            ..Default::default()
        };
        assert_eq!(metrics.interactions(), u64::MAX);
        assert!(metrics.engagement_rate().is_finite());
    }

    #[test]
    fn test_queue_item_retry_budget() {
        let mut item = QueueItem::new("p1", "facebook", now(), 3, now());
        assert!(item.can_retry());
        assert_eq!(item.attempts_remaining(), 3);

        item.attempt_count = 3;
        assert!(!item.can_retry());

        item.attempt_count = 1;
        item.status = QueueStatus::Completed;
        assert!(!item.can_retry());
    }

    #[test]
    fn test_queue_settings_serde_uses_hhmm_and_sunday_index() {
        let json = r#"{
            "tenant_id": "t1",
            "account_id": "a1",
            "platform": "facebook",
            "enabled": true,
            "posting_times": ["14:00", "09:00"],
            "days_enabled": [1, 2, 3, 4, 5],
            "posts_per_day": 3
        }"#;
        let settings: QueueSettings = serde_json::from_str(json).unwrap();
        let settings = settings.normalize();
        assert_eq!(format_hhmm(&settings.posting_times[0]), "09:00");
        assert!(settings.is_day_enabled(Weekday::Mon));
        assert!(!settings.is_day_enabled(Weekday::Sun));

        let back = serde_json::to_value(&settings).unwrap();
        assert_eq!(back["posting_times"][1], "14:00");
        assert_eq!(back["days_enabled"][0], 1);
    }

    #[test]
    fn test_queue_settings_rejects_bad_time() {
        let json = r#"{"tenant_id":"t","account_id":"a","platform":"x","enabled":true,
            "posting_times":["25:00"],"days_enabled":[1],"posts_per_day":1}"#;
        assert!(serde_json::from_str::<QueueSettings>(json).is_err());
    }
}
