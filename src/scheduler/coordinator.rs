//! Top-level orchestration for callers
//!
//! The coordinator is what request-handling code talks to: it creates and
//! edits posts, keeps their queue items in step with the post lifecycle, and
//! builds the calendar and statistics views. Publishing itself belongs to
//! [`QueueDispatcher`](super::dispatcher::QueueDispatcher); the coordinator
//! only ever enqueues.
//!
//! Every operation is tenant-scoped. A post owned by another tenant, or
//! soft-deleted, is reported as not found.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::conflicts::{plan_resolution, ConflictDetector, ConflictMap, PlannedMove, ResolutionStrategy};
use super::error::{SchedulerError, SchedulerResult};
use super::slots::{SlotCalculator, GENERIC_PLATFORM};
use crate::clock::Clock;
use crate::config::Config;
use crate::models::{
    dedup_platforms, parse_hhmm, weekday_from_sunday, ApprovalStatus, MediaRef, PlatformPost,
    PlatformPostStatus, PostStatus, QueueItem, QueueSettings, ScheduledPost,
};
use crate::storage::{PostQuery, QueueDepth, SchedulingStore};

/// Reason recorded on queue items of a cancelled post
pub const CANCELLED_REASON: &str = "cancelled";

const DELETED_REASON: &str = "deleted";
const REJECTED_REASON: &str = "rejected";
const SUPERSEDED_REASON: &str = "superseded by edit";

const WEEKEND_FALLBACK_HOUR: u32 = 10;
const WEEKDAY_FALLBACK_HOUR: u32 = 14;

// ============================================================================
// Inputs
// ============================================================================

/// Input for [`SchedulingCoordinator::create_post`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPost {
    pub tenant_id: String,
    pub account_id: String,
    pub content: String,
    pub platforms: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// `None` saves a draft
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub requires_approval: bool,
    pub created_by: Option<String>,
}

/// Partial edit for [`SchedulingCoordinator::update_post`]. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostUpdate {
    pub content: Option<String>,
    pub platforms: Option<Vec<String>>,
    pub media: Option<Vec<MediaRef>>,
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Raw queue settings as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub enabled: bool,
    /// `HH:MM` strings
    pub posting_times: Vec<String>,
    /// 0 = Sunday .. 6 = Saturday
    pub days_enabled: Vec<u32>,
    pub posts_per_day: u32,
}

impl SettingsUpdate {
    /// Validate and convert into normalized settings
    pub fn into_settings(
        self,
        tenant_id: &str,
        account_id: &str,
        platform: &str,
    ) -> SchedulerResult<QueueSettings> {
        if self.posts_per_day == 0 {
            return Err(SchedulerError::invalid_schedule(
                "posts_per_day must be at least 1",
            ));
        }

        let posting_times = self
            .posting_times
            .iter()
            .map(|raw| {
                parse_hhmm(raw).ok_or_else(|| {
                    SchedulerError::invalid_schedule(format!("'{raw}' is not a HH:MM time"))
                })
            })
            .collect::<SchedulerResult<Vec<NaiveTime>>>()?;

        let days_enabled = self
            .days_enabled
            .iter()
            .map(|day| {
                weekday_from_sunday(*day).ok_or_else(|| {
                    SchedulerError::invalid_schedule(format!("weekday {day} is outside 0-6"))
                })
            })
            .collect::<SchedulerResult<Vec<Weekday>>>()?;

        Ok(QueueSettings {
            tenant_id: tenant_id.to_string(),
            account_id: account_id.to_string(),
            platform: platform.to_string(),
            enabled: self.enabled,
            posting_times,
            days_enabled,
            posts_per_day: self.posts_per_day,
        }
        .normalize())
    }
}

/// How [`SchedulingCoordinator::bulk_reschedule`] picks times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStrategy {
    /// Keep each post's local time of day
    PreserveTime,
    /// Best-time recommendation for the weekday, else a fixed default hour
    OptimizeTimes,
}

// ============================================================================
// Views
// ============================================================================

/// A persisted post plus any advisory conflicts found for it
#[derive(Debug, Clone, Serialize)]
pub struct SavedPost {
    pub post: ScheduledPost,
    pub conflicts: ConflictMap,
}

/// Queue overview for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatistics {
    pub total_queued: usize,
    pub next_slot: Option<DateTime<Utc>>,
    pub slots_available_today: u32,
}

/// A post with its per-platform breakdown
#[derive(Debug, Clone, Serialize)]
pub struct CalendarEntry {
    pub post: ScheduledPost,
    pub platforms: Vec<PlatformPost>,
}

/// Posts for one local date
#[derive(Debug, Clone, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub posts: Vec<CalendarEntry>,
}

/// Tenant dashboard numbers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStatistics {
    pub by_status: BTreeMap<String, usize>,
    pub published_today: usize,
    /// Failed platform records of failed posts, per platform
    pub failed_platforms: BTreeMap<String, usize>,
    pub queue: QueueDepth,
}

/// Everything known about one post
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    pub post: ScheduledPost,
    pub platform_posts: Vec<PlatformPost>,
    pub queue_items: Vec<QueueItem>,
}

/// A post left alone by a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPost {
    pub post_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkRescheduleReport {
    pub moved: Vec<PlannedMove>,
    pub skipped: Vec<SkippedPost>,
}

// ============================================================================
// SchedulingCoordinator
// ============================================================================

pub struct SchedulingCoordinator {
    store: Arc<dyn SchedulingStore>,
    clock: Arc<dyn Clock>,
    slots: SlotCalculator,
    conflicts: ConflictDetector,
    max_attempts: u32,
}

impl SchedulingCoordinator {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> SchedulerResult<Self> {
        let slots = SlotCalculator::new(store.clone(), clock.clone(), &config.scheduling)?;
        let conflicts = ConflictDetector::new(store.clone(), config.scheduling.conflict_window());
        Ok(Self {
            store,
            clock,
            slots,
            conflicts,
            max_attempts: config.dispatcher.max_attempts.max(1),
        })
    }

    pub fn slots(&self) -> &SlotCalculator {
        &self.slots
    }

    pub fn conflicts(&self) -> &ConflictDetector {
        &self.conflicts
    }

    // --- lifecycle -----------------------------------------------------------

    /// Persist a new post. With a time it is `scheduled` and enqueued once
    /// per platform; without one it is a `draft`. Conflicts are returned,
    /// never enforced.
    pub fn create_post(&self, input: NewPost) -> SchedulerResult<SavedPost> {
        let now = self.clock.now();
        let platforms = normalize_platforms(input.platforms)?;

        let mut post = ScheduledPost::new_draft(
            input.tenant_id,
            input.account_id,
            input.content,
            platforms,
            now,
        );
        post.media = input.media;
        post.options = input.options;
        post.created_by = input.created_by;
        if input.requires_approval {
            post.approval_status = ApprovalStatus::Pending;
        }

        let mut conflicts = ConflictMap::new();
        if let Some(at) = input.scheduled_at {
            ensure_not_past(at, now)?;
            conflicts = self.conflicts.find_conflicts(
                &post.tenant_id,
                &post.account_id,
                at,
                &post.platforms,
                None,
            )?;
            post.scheduled_at = Some(at);
            post.status = PostStatus::Scheduled;
        }

        self.store.insert_post(&post)?;
        if post.status == PostStatus::Scheduled {
            self.enqueue(&post, &post.platforms)?;
        }

        tracing::info!(
            post_id = %post.id,
            tenant_id = %post.tenant_id,
            status = %post.status,
            platforms = post.platforms.len(),
            conflicts = conflicts.len(),
            "Post created"
        );
        Ok(SavedPost { post, conflicts })
    }

    /// Edit a `draft` or `scheduled` post. Giving a draft a time schedules
    /// it; changing the time or platforms of a scheduled post re-enqueues.
    pub fn update_post(
        &self,
        tenant_id: &str,
        post_id: &str,
        update: PostUpdate,
    ) -> SchedulerResult<SavedPost> {
        let now = self.clock.now();
        let mut post = self.load(tenant_id, post_id)?;
        if !matches!(post.status, PostStatus::Draft | PostStatus::Scheduled) {
            return Err(SchedulerError::invalid_transition("update", post.status));
        }

        let mut requeue = false;
        if let Some(content) = update.content {
            post.content = content;
        }
        if let Some(media) = update.media {
            post.media = media;
        }
        if let Some(options) = update.options {
            post.options = options;
        }
        if let Some(platforms) = update.platforms {
            let platforms = normalize_platforms(platforms)?;
            requeue |= platforms != post.platforms;
            post.platforms = platforms;
        }
        if let Some(at) = update.scheduled_at {
            ensure_not_past(at, now)?;
            requeue |= post.scheduled_at != Some(at);
            post.scheduled_at = Some(at);
            post.status = PostStatus::Scheduled;
        }
        post.updated_at = now;

        let conflicts = match post.scheduled_at {
            Some(at) if post.status == PostStatus::Scheduled => self.conflicts.find_conflicts(
                &post.tenant_id,
                &post.account_id,
                at,
                &post.platforms,
                Some(&post.id),
            )?,
            _ => ConflictMap::new(),
        };

        self.store.update_post(&post)?;
        if requeue && post.status == PostStatus::Scheduled {
            self.store.cancel_queue_items(&post.id, SUPERSEDED_REASON, now)?;
            self.enqueue(&post, &post.platforms)?;
        }

        tracing::info!(post_id = %post.id, requeued = requeue, "Post updated");
        Ok(SavedPost { post, conflicts })
    }

    /// Move a `scheduled` or `failed` post to a new time. Platforms already
    /// published keep their records; the rest get a fresh attempt budget.
    pub fn reschedule(
        &self,
        tenant_id: &str,
        post_id: &str,
        at: DateTime<Utc>,
    ) -> SchedulerResult<ScheduledPost> {
        let now = self.clock.now();
        let mut post = self.load(tenant_id, post_id)?;
        if !matches!(post.status, PostStatus::Scheduled | PostStatus::Failed) {
            return Err(SchedulerError::invalid_transition("reschedule", post.status));
        }
        ensure_not_past(at, now)?;

        let published: HashSet<String> = self
            .store
            .platform_posts_for(&post.id)?
            .into_iter()
            .filter(PlatformPost::is_published)
            .map(|p| p.platform)
            .collect();
        let remaining: Vec<String> = post
            .platforms
            .iter()
            .filter(|p| !published.contains(*p))
            .cloned()
            .collect();

        let previous = post.scheduled_at;
        post.scheduled_at = Some(at);
        post.status = PostStatus::Scheduled;
        post.error_message = None;
        post.updated_at = now;
        self.store.update_post(&post)?;
        let enqueued = self.enqueue(&post, &remaining)?;

        tracing::info!(
            post_id = %post.id,
            from = ?previous,
            to = %at,
            enqueued,
            "Post rescheduled"
        );
        Ok(post)
    }

    /// Cancel a post. Pending queue items fail with reason "cancelled";
    /// items already being published finish, but their result never
    /// changes the post status again.
    pub fn cancel(&self, tenant_id: &str, post_id: &str) -> SchedulerResult<ScheduledPost> {
        let now = self.clock.now();
        let post = self.load(tenant_id, post_id)?;
        let from = [
            PostStatus::Draft,
            PostStatus::Scheduled,
            PostStatus::Failed,
            PostStatus::Publishing,
        ];
        if !from.contains(&post.status) {
            return Err(SchedulerError::invalid_transition("cancel", post.status));
        }

        if !self
            .store
            .transition_post(&post.id, &from, PostStatus::Cancelled, None, now)?
        {
            let current = self.load(tenant_id, post_id)?;
            return Err(SchedulerError::invalid_transition("cancel", current.status));
        }
        let cancelled_items = self.store.cancel_queue_items(&post.id, CANCELLED_REASON, now)?;

        tracing::info!(post_id = %post.id, cancelled_items, "Post cancelled");
        self.load(tenant_id, post_id)
    }

    /// Soft delete. Outstanding queue items are cancelled.
    pub fn delete(&self, tenant_id: &str, post_id: &str) -> SchedulerResult<()> {
        let now = self.clock.now();
        let mut post = self.load(tenant_id, post_id)?;
        if matches!(post.status, PostStatus::Publishing | PostStatus::Published) {
            return Err(SchedulerError::invalid_transition("delete", post.status));
        }

        post.deleted_at = Some(now);
        post.updated_at = now;
        self.store.update_post(&post)?;
        let cancelled_items = self.store.cancel_queue_items(&post.id, DELETED_REASON, now)?;

        tracing::info!(post_id = %post.id, cancelled_items, "Post deleted");
        Ok(())
    }

    /// Schedule a `draft` or `scheduled` post for right now
    pub fn publish_now(&self, tenant_id: &str, post_id: &str) -> SchedulerResult<ScheduledPost> {
        let now = self.clock.now();
        let mut post = self.load(tenant_id, post_id)?;
        if !matches!(post.status, PostStatus::Draft | PostStatus::Scheduled) {
            return Err(SchedulerError::invalid_transition("publish", post.status));
        }

        post.scheduled_at = Some(now);
        post.status = PostStatus::Scheduled;
        post.updated_at = now;
        self.store.update_post(&post)?;
        self.enqueue(&post, &post.platforms)?;

        tracing::info!(post_id = %post.id, "Post queued for immediate publishing");
        Ok(post)
    }

    pub fn approve(&self, tenant_id: &str, post_id: &str) -> SchedulerResult<ScheduledPost> {
        self.set_approval(tenant_id, post_id, ApprovalStatus::Approved)
    }

    pub fn reject(&self, tenant_id: &str, post_id: &str) -> SchedulerResult<ScheduledPost> {
        self.set_approval(tenant_id, post_id, ApprovalStatus::Rejected)
    }

    fn set_approval(
        &self,
        tenant_id: &str,
        post_id: &str,
        approval: ApprovalStatus,
    ) -> SchedulerResult<ScheduledPost> {
        let mut post = self.load(tenant_id, post_id)?;
        if post.status.is_final() || post.status == PostStatus::Publishing {
            return Err(SchedulerError::invalid_transition(
                match approval {
                    ApprovalStatus::Rejected => "reject",
                    _ => "approve",
                },
                post.status,
            ));
        }

        let now = self.clock.now();
        post.approval_status = approval;
        post.updated_at = now;
        self.store.update_post(&post)?;

        let cancelled_items = if approval == ApprovalStatus::Rejected {
            self.store.cancel_queue_items(&post.id, REJECTED_REASON, now)?
        } else {
            0
        };
        tracing::info!(
            post_id = %post.id,
            approval = approval.as_str(),
            cancelled_items,
            "Approval updated"
        );
        Ok(post)
    }

    // --- settings ------------------------------------------------------------

    /// Stored settings, or unsaved platform defaults
    pub fn queue_settings(
        &self,
        tenant_id: &str,
        account_id: &str,
        platform: &str,
    ) -> SchedulerResult<QueueSettings> {
        self.slots.settings_for(tenant_id, account_id, platform)
    }

    pub fn save_queue_settings(
        &self,
        tenant_id: &str,
        account_id: &str,
        platform: &str,
        update: SettingsUpdate,
    ) -> SchedulerResult<QueueSettings> {
        let settings = update.into_settings(tenant_id, account_id, platform)?;
        self.store.save_queue_settings(&settings)?;
        tracing::info!(
            tenant_id,
            account_id,
            enabled = settings.enabled,
            times = settings.posting_times.len(),
            "Queue settings saved"
        );
        Ok(settings)
    }

    pub fn queue_statistics(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> SchedulerResult<QueueStatistics> {
        let total_queued = self
            .store
            .list_posts(
                &PostQuery::for_tenant(tenant_id)
                    .account(account_id)
                    .status(PostStatus::Scheduled),
            )?
            .len();

        let settings = self.slots.settings_for(tenant_id, account_id, GENERIC_PLATFORM)?;
        let next_slot = match self.slots.next_slot_for(&settings) {
            Ok(slot) => Some(slot),
            Err(e) if e.is_configuration() => None,
            Err(e) => return Err(e),
        };

        Ok(QueueStatistics {
            total_queued,
            next_slot,
            slots_available_today: self.slots.slots_available_today(&settings),
        })
    }

    // --- views ---------------------------------------------------------------

    /// Scheduled, publishing and published posts in `[from, to]`, grouped by
    /// local date
    pub fn calendar(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SchedulerResult<Vec<CalendarDay>> {
        let query = PostQuery::for_tenant(tenant_id)
            .status(PostStatus::Scheduled)
            .status(PostStatus::Publishing)
            .status(PostStatus::Published)
            .between(from, to);

        let offset = self.slots.offset();
        let mut days: BTreeMap<NaiveDate, Vec<CalendarEntry>> = BTreeMap::new();
        for post in self.store.list_posts(&query)? {
            let Some(at) = post.scheduled_at else {
                continue;
            };
            let platforms = self.store.platform_posts_for(&post.id)?;
            days.entry(at.with_timezone(&offset).date_naive())
                .or_default()
                .push(CalendarEntry { post, platforms });
        }

        Ok(days
            .into_iter()
            .map(|(date, posts)| CalendarDay { date, posts })
            .collect())
    }

    pub fn statistics(&self, tenant_id: &str) -> SchedulerResult<DashboardStatistics> {
        let posts = self.store.list_posts(&PostQuery::for_tenant(tenant_id))?;
        let offset = self.slots.offset();
        let today = self.slots.local_now().date_naive();

        let mut by_status: BTreeMap<String, usize> = PostStatus::all()
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut published_today = 0;
        let mut failed_platforms: BTreeMap<String, usize> = BTreeMap::new();

        for post in &posts {
            *by_status.entry(post.status.as_str().to_string()).or_default() += 1;

            if post
                .published_at
                .is_some_and(|at| at.with_timezone(&offset).date_naive() == today)
            {
                published_today += 1;
            }

            if post.status == PostStatus::Failed {
                for record in self.store.platform_posts_for(&post.id)? {
                    if record.status == PlatformPostStatus::Failed {
                        *failed_platforms.entry(record.platform).or_default() += 1;
                    }
                }
            }
        }

        Ok(DashboardStatistics {
            by_status,
            published_today,
            failed_platforms,
            queue: self.store.queue_depth(tenant_id)?,
        })
    }

    pub fn post_detail(&self, tenant_id: &str, post_id: &str) -> SchedulerResult<PostDetail> {
        let post = self.load(tenant_id, post_id)?;
        Ok(PostDetail {
            platform_posts: self.store.platform_posts_for(&post.id)?,
            queue_items: self.store.queue_items_for(&post.id)?,
            post,
        })
    }

    // --- bulk operations -----------------------------------------------------

    /// Detect conflict groups in `[from, to]` and apply `strategy` to each.
    /// A post that sits in several groups is moved once.
    pub fn resolve_conflicts(
        &self,
        tenant_id: &str,
        account_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        strategy: ResolutionStrategy,
    ) -> SchedulerResult<Vec<PlannedMove>> {
        let groups = self
            .conflicts
            .find_queue_conflicts(tenant_id, account_id, from, to)?;

        let mut moved: HashSet<String> = HashSet::new();
        let mut applied = Vec::new();
        for group in &groups {
            for planned in plan_resolution(group, strategy) {
                if !moved.insert(planned.post_id.clone()) {
                    continue;
                }
                self.reschedule(tenant_id, &planned.post_id, planned.to)?;
                applied.push(planned);
            }
        }

        tracing::info!(
            account_id,
            groups = groups.len(),
            moved = applied.len(),
            "Conflicts resolved"
        );
        Ok(applied)
    }

    /// Spread posts over consecutive days starting at `start_date`, one post
    /// per day in the given order
    pub fn bulk_reschedule(
        &self,
        tenant_id: &str,
        post_ids: &[String],
        start_date: NaiveDate,
        strategy: BulkStrategy,
    ) -> SchedulerResult<BulkRescheduleReport> {
        let offset = self.slots.offset();
        let mut report = BulkRescheduleReport::default();

        for (index, post_id) in post_ids.iter().enumerate() {
            let post = match self.load(tenant_id, post_id) {
                Ok(post) => post,
                Err(SchedulerError::PostNotFound { .. }) => {
                    report.skipped.push(skipped(post_id, "post not found"));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(date) = start_date.checked_add_signed(Duration::days(index as i64)) else {
                report.skipped.push(skipped(post_id, "date out of range"));
                continue;
            };

            let time = match strategy {
                BulkStrategy::PreserveTime => post
                    .scheduled_at
                    .map(|at| at.with_timezone(&offset).time())
                    .or_else(|| NaiveTime::from_hms_opt(WEEKDAY_FALLBACK_HOUR, 0, 0)),
                BulkStrategy::OptimizeTimes => {
                    let platform = post
                        .platforms
                        .first()
                        .map(String::as_str)
                        .unwrap_or(GENERIC_PLATFORM);
                    let hour = self
                        .slots
                        .best_hour(tenant_id, platform, date.weekday())?
                        .unwrap_or_else(|| default_hour_for(date.weekday()));
                    NaiveTime::from_hms_opt(hour, 0, 0)
                }
            };

            let Some(at) = time
                .and_then(|t| offset.from_local_datetime(&date.and_time(t)).single())
                .map(|dt| dt.with_timezone(&Utc))
            else {
                report.skipped.push(skipped(post_id, "no valid time"));
                continue;
            };

            let from = post.scheduled_at;
            match self.reschedule(tenant_id, post_id, at) {
                Ok(_) => report.moved.push(PlannedMove {
                    post_id: post_id.clone(),
                    from: from.unwrap_or(at),
                    to: at,
                }),
                Err(e @ (SchedulerError::InvalidTransition { .. }
                | SchedulerError::InvalidSchedule { .. })) => {
                    report.skipped.push(skipped(post_id, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            moved = report.moved.len(),
            skipped = report.skipped.len(),
            "Bulk reschedule complete"
        );
        Ok(report)
    }

    // --- helpers -------------------------------------------------------------

    fn load(&self, tenant_id: &str, post_id: &str) -> SchedulerResult<ScheduledPost> {
        self.store
            .get_post(post_id)?
            .filter(|p| p.tenant_id == tenant_id && !p.is_deleted())
            .ok_or_else(|| SchedulerError::post_not_found(post_id))
    }

    /// Queue `platforms` of a scheduled post at its time. Returns how many
    /// items were (re)armed.
    fn enqueue(&self, post: &ScheduledPost, platforms: &[String]) -> SchedulerResult<usize> {
        let Some(at) = post.scheduled_at else {
            return Err(SchedulerError::invalid_schedule(
                "a scheduled post needs a scheduled time",
            ));
        };

        let now = self.clock.now();
        let mut armed = 0;
        for platform in platforms {
            let item = QueueItem::new(&post.id, platform, at, self.max_attempts, now);
            if self.store.upsert_queue_item(&item)? {
                armed += 1;
            } else {
                tracing::debug!(post_id = %post.id, platform = %platform, "Queue item left as is");
            }
        }
        Ok(armed)
    }
}

fn normalize_platforms(platforms: Vec<String>) -> SchedulerResult<Vec<String>> {
    let platforms = dedup_platforms(
        platforms
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect(),
    );
    if platforms.is_empty() {
        return Err(SchedulerError::NoPlatforms);
    }
    Ok(platforms)
}

fn ensure_not_past(at: DateTime<Utc>, now: DateTime<Utc>) -> SchedulerResult<()> {
    if at < now {
        return Err(SchedulerError::invalid_schedule(format!(
            "{at} is in the past"
        )));
    }
    Ok(())
}

fn default_hour_for(day: Weekday) -> u32 {
    match day {
        Weekday::Sat | Weekday::Sun => WEEKEND_FALLBACK_HOUR,
        _ => WEEKDAY_FALLBACK_HOUR,
    }
}

fn skipped(post_id: &str, reason: impl Into<String>) -> SkippedPost {
    SkippedPost {
        post_id: post_id.to_string(),
        reason: reason.into(),
    }
}
