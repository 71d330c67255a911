//! Advisory detection of posts scheduled too close together
//!
//! Two `scheduled` posts conflict when they target the same platform and
//! their times are within the configured window of each other (inclusive).
//! Different platforms never conflict. Detection never blocks persistence;
//! callers decide what to do with the result.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::SchedulerResult;
use crate::models::{PostStatus, ScheduledPost};
use crate::storage::{PostQuery, SchedulingStore};

const PREVIEW_CHARS: usize = 100;

/// Gap used by [`ResolutionStrategy::SpaceEvenly`]
pub const SPACING_MINUTES: i64 = 120;

/// Delay used by [`ResolutionStrategy::Defer`]
pub const DEFER_HOURS: i64 = 2;

/// A scheduled post that collides with a candidate time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingPost {
    pub post_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub content_preview: String,
    /// Signed distance from the candidate time
    pub minutes_apart: i64,
}

/// Conflicts keyed by platform. Platforms without conflicts are absent.
pub type ConflictMap = BTreeMap<String, Vec<ConflictingPost>>;

/// Posts on one platform clustered within one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictGroup {
    pub platform: String,
    /// Ordered by scheduled time, earliest first
    pub posts: Vec<ConflictingPost>,
}

/// How to pull a conflict group apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep the earliest post, space the rest 120 minutes apart from it
    SpaceEvenly,
    /// Keep the earliest post, push each later post back two hours
    Defer,
}

/// One proposed time change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub post_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

fn conflicting(post: &ScheduledPost, at: DateTime<Utc>, reference: DateTime<Utc>) -> ConflictingPost {
    ConflictingPost {
        post_id: post.id.clone(),
        scheduled_at: at,
        content_preview: preview(&post.content),
        minutes_apart: (at - reference).num_minutes(),
    }
}

/// Moves that would resolve a group. The earliest post never moves.
pub fn plan_resolution(group: &ConflictGroup, strategy: ResolutionStrategy) -> Vec<PlannedMove> {
    let Some(anchor) = group.posts.first() else {
        return Vec::new();
    };

    group
        .posts
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, post)| {
            let to = match strategy {
                ResolutionStrategy::SpaceEvenly => {
                    anchor.scheduled_at + Duration::minutes(SPACING_MINUTES * i as i64)
                }
                ResolutionStrategy::Defer => post.scheduled_at + Duration::hours(DEFER_HOURS),
            };
            PlannedMove {
                post_id: post.post_id.clone(),
                from: post.scheduled_at,
                to,
            }
        })
        .collect()
}

// ============================================================================
// ConflictDetector
// ============================================================================

/// Finds same-platform posts within the conflict window
pub struct ConflictDetector {
    store: Arc<dyn SchedulingStore>,
    window: Duration,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn SchedulingStore>, window: Duration) -> Self {
        Self {
            store,
            window: window.abs(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Scheduled posts of the account that collide with `candidate` on any
    /// of `platforms`. `exclude_post` skips the post being edited.
    pub fn find_conflicts(
        &self,
        tenant_id: &str,
        account_id: &str,
        candidate: DateTime<Utc>,
        platforms: &[String],
        exclude_post: Option<&str>,
    ) -> SchedulerResult<ConflictMap> {
        let query = PostQuery::for_tenant(tenant_id)
            .account(account_id)
            .status(PostStatus::Scheduled)
            .between(candidate - self.window, candidate + self.window);
        let nearby = self.store.list_posts(&query)?;

        let mut conflicts = ConflictMap::new();
        for platform in platforms {
            let hits: Vec<ConflictingPost> = nearby
                .iter()
                .filter(|p| Some(p.id.as_str()) != exclude_post && p.targets(platform))
                .filter_map(|p| p.scheduled_at.map(|at| (p, at)))
                .filter(|(_, at)| (*at - candidate).abs() <= self.window)
                .map(|(p, at)| conflicting(p, at, candidate))
                .collect();

            if !hits.is_empty() {
                conflicts.insert(platform.clone(), hits);
            }
        }

        if !conflicts.is_empty() {
            tracing::debug!(
                account_id,
                candidate = %candidate,
                platforms = conflicts.len(),
                "Scheduling conflicts detected"
            );
        }
        Ok(conflicts)
    }

    /// Cluster an account's scheduled posts in `[from, to]` into conflict
    /// groups, per platform. Each group is anchored on its earliest post and
    /// holds every later post within the window of that anchor.
    pub fn find_queue_conflicts(
        &self,
        tenant_id: &str,
        account_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SchedulerResult<Vec<ConflictGroup>> {
        let query = PostQuery::for_tenant(tenant_id)
            .account(account_id)
            .status(PostStatus::Scheduled)
            .between(from, to);
        let posts = self.store.list_posts(&query)?;

        let mut by_platform: BTreeMap<&str, Vec<(&ScheduledPost, DateTime<Utc>)>> = BTreeMap::new();
        for post in &posts {
            if let Some(at) = post.scheduled_at {
                for platform in &post.platforms {
                    by_platform
                        .entry(platform.as_str())
                        .or_default()
                        .push((post, at));
                }
            }
        }

        let mut groups = Vec::new();
        for (platform, mut entries) in by_platform {
            entries.sort_by_key(|(_, at)| *at);

            let mut i = 0;
            while i < entries.len() {
                let anchor_at = entries[i].1;
                let mut j = i + 1;
                while j < entries.len() && entries[j].1 - anchor_at <= self.window {
                    j += 1;
                }
                if j - i > 1 {
                    groups.push(ConflictGroup {
                        platform: platform.to_string(),
                        posts: entries[i..j]
                            .iter()
                            .map(|(p, at)| conflicting(p, *at, anchor_at))
                            .collect(),
                    });
                }
                i = j;
            }
        }

        Ok(groups)
    }
}
