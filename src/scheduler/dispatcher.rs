//! Queue dispatch: claim due items, publish, record outcomes
//!
//! # Lifecycle
//!
//! ```text
//! pending ──claim (CAS)──▶ processing ──ok──▶ completed
//!    ▲                         │
//!    └──── retry (backoff) ────┤
//!                              └──budget spent──▶ failed
//! ```
//!
//! One dispatch pass pulls every due item, groups them by post and runs
//! posts with bounded concurrency. Within a post, the per-platform branches
//! run concurrently and each publish call is bounded by a timeout. Once all
//! branches have resolved, the parent post status is recomputed in a single
//! barrier step ([`QueueDispatcher::finalize_post`]).
//!
//! The claim is the serialization point between workers: only the caller
//! that moves an item from `pending` to `processing` publishes it. Items
//! abandoned in `processing` (crash, lost worker) are picked up by
//! [`QueueDispatcher::reclaim_stuck`].

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::error::{SchedulerError, SchedulerResult};
use super::retry::{RetryDecision, RetryPolicy};
use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::metrics::{self, AttemptOutcome};
use crate::models::{PostStatus, QueueItem, QueueStatus, ScheduledPost};
use crate::publisher::{MetricsProvider, PlatformPublisher, PublishError, PublishRequest};
use crate::storage::{AttemptResolution, SchedulingStore};

/// Counts from one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Items published
    pub succeeded: usize,
    /// Failed attempts, including the ones requeued for retry
    pub failed: usize,
    /// Failed attempts that went back to `pending`
    pub retried: usize,
    /// Items left untouched (post not publishable, or claimed elsewhere)
    pub skipped: usize,
}

impl DispatchReport {
    fn absorb(&mut self, other: DispatchReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.retried += other.retried;
        self.skipped += other.skipped;
    }

    fn count(&mut self, outcome: &PlatformOutcome) {
        match outcome {
            PlatformOutcome::Published { .. } => self.succeeded += 1,
            PlatformOutcome::Retrying { .. } => {
                self.failed += 1;
                self.retried += 1;
            }
            PlatformOutcome::Failed { .. } => self.failed += 1,
            PlatformOutcome::NotClaimed => self.skipped += 1,
        }
    }
}

/// Watchdog plus dispatch, as run by one scheduler tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub reclaimed: usize,
    #[serde(flatten)]
    pub dispatch: DispatchReport,
}

/// Result of a bulk metrics sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

/// Outcome of one single-platform publish unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformOutcome {
    Published { external_id: String },
    Retrying { retry_at: DateTime<Utc> },
    Failed { error: String },
    /// Another worker owns the item, or already settled it
    NotClaimed,
}

impl PlatformOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Message stored on a parent post when some platforms did not publish
pub fn failed_platforms_message(platforms: &[String]) -> String {
    format!("Failed to publish to: {}", platforms.join(", "))
}

// ============================================================================
// QueueDispatcher
// ============================================================================

/// Owns the queue item lifecycle
pub struct QueueDispatcher {
    store: Arc<dyn SchedulingStore>,
    publisher: Arc<dyn PlatformPublisher>,
    metrics_provider: Arc<dyn MetricsProvider>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    publish_timeout: std::time::Duration,
    stuck_after: Duration,
    metrics_stale_after: Duration,
    max_concurrent_posts: usize,
    batch_size: usize,
}

impl QueueDispatcher {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        publisher: Arc<dyn PlatformPublisher>,
        metrics_provider: Arc<dyn MetricsProvider>,
        clock: Arc<dyn Clock>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            metrics_provider,
            clock,
            retry: RetryPolicy::from_config(config),
            publish_timeout: config.publish_timeout(),
            stuck_after: config.stuck_after(),
            metrics_stale_after: config.metrics_stale_after(),
            max_concurrent_posts: config.max_concurrent_posts.max(1),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Reclaim abandoned items, then dispatch everything due
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        let reclaimed = self.reclaim_stuck().await?;
        let dispatch = self.process_due().await?;
        Ok(TickReport {
            reclaimed,
            dispatch,
        })
    }

    /// One bounded pass over due items
    pub async fn process_due(&self) -> SchedulerResult<DispatchReport> {
        let span = tracing::info_span!("dispatch_pass");
        async {
            let now = self.clock.now();
            let due = self.store.due_queue_items(now, self.batch_size)?;
            metrics::set_dispatch_pass_items(due.len());

            if due.is_empty() {
                tracing::debug!("No due queue items");
                return Ok(DispatchReport::default());
            }
            tracing::info!(items = due.len(), "Dispatching due queue items");

            let report = self.dispatch_groups(group_by_post(due)).await;

            tracing::info!(
                succeeded = report.succeeded,
                failed = report.failed,
                retried = report.retried,
                skipped = report.skipped,
                "Dispatch pass complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Dispatch the due items of a single post right away
    pub async fn process_post(&self, post_id: &str) -> SchedulerResult<DispatchReport> {
        let now = self.clock.now();
        let due: Vec<QueueItem> = self
            .store
            .queue_items_for(post_id)?
            .into_iter()
            .filter(|item| item.is_due(now) && item.can_retry())
            .collect();

        if due.is_empty() {
            return Ok(DispatchReport::default());
        }
        self.dispatch_post(post_id, due).await
    }

    async fn dispatch_groups(&self, groups: Vec<(String, Vec<QueueItem>)>) -> DispatchReport {
        let results: Vec<(String, usize, SchedulerResult<DispatchReport>)> = stream::iter(groups)
            .map(|(post_id, items)| async move {
                let count = items.len();
                let result = self.dispatch_post(&post_id, items).await;
                (post_id, count, result)
            })
            .buffer_unordered(self.max_concurrent_posts)
            .collect()
            .await;

        let mut report = DispatchReport::default();
        for (post_id, count, result) in results {
            match result {
                Ok(post_report) => report.absorb(post_report),
                Err(e) => {
                    tracing::error!(post_id = %post_id, items = count, error = %e, "Post dispatch failed");
                    report.skipped += count;
                }
            }
        }
        report
    }

    async fn dispatch_post(
        &self,
        post_id: &str,
        items: Vec<QueueItem>,
    ) -> SchedulerResult<DispatchReport> {
        let mut report = DispatchReport::default();

        let Some(post) = self.store.get_post(post_id)? else {
            tracing::warn!(post_id, "Queue items reference a missing post");
            report.skipped += items.len();
            return Ok(report);
        };

        if !post.is_publishable() {
            tracing::debug!(
                post_id,
                status = %post.status,
                approval = post.approval_status.as_str(),
                "Post not publishable, leaving items pending"
            );
            report.skipped += items.len();
            return Ok(report);
        }

        if post.status == PostStatus::Scheduled {
            self.store.transition_post(
                &post.id,
                &[PostStatus::Scheduled],
                PostStatus::Publishing,
                None,
                self.clock.now(),
            )?;
        }

        let outcomes =
            futures::future::join_all(items.iter().map(|item| self.publish_to_platform(&post, item)))
                .await;

        for (item, outcome) in items.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => report.count(&outcome),
                Err(e) => {
                    tracing::error!(
                        post_id,
                        queue_item_id = %item.id,
                        platform = %item.platform,
                        error = %e,
                        "Failed to record publish attempt"
                    );
                    report.skipped += 1;
                }
            }
        }

        // Barrier: every branch above has resolved
        self.finalize_post(&post.id)?;
        Ok(report)
    }

    /// Claim one item and publish the post to its platform. The external
    /// call's result is written together with the queue item state, so a
    /// crash leaves the item either `processing` (reclaimed later) or fully
    /// settled.
    pub async fn publish_to_platform(
        &self,
        post: &ScheduledPost,
        item: &QueueItem,
    ) -> SchedulerResult<PlatformOutcome> {
        if !self
            .store
            .claim_queue_item(&item.id, &post.tenant_id, self.clock.now())?
        {
            tracing::debug!(queue_item_id = %item.id, "Queue item already claimed");
            return Ok(PlatformOutcome::NotClaimed);
        }

        let mut claimed = item.clone();
        claimed.status = QueueStatus::Processing;
        claimed.attempt_count += 1;

        tracing::info!(
            post_id = %post.id,
            queue_item_id = %item.id,
            platform = %item.platform,
            attempt = claimed.attempt_count,
            max_attempts = claimed.max_attempts,
            "Publishing to platform"
        );

        let request = PublishRequest::for_post(post, &item.platform);
        let started = Instant::now();
        let result =
            match tokio::time::timeout(self.publish_timeout, self.publisher.publish(&request)).await {
                Ok(result) => result,
                Err(_) => Err(PublishError::timeout(format!(
                    "publish to {} timed out after {}ms",
                    item.platform,
                    self.publish_timeout.as_millis()
                ))),
            };
        let elapsed = started.elapsed().as_secs_f64();

        let result = result.and_then(|receipt| {
            if receipt.external_id.trim().is_empty() {
                Err(PublishError::unclassified("platform returned an empty external id"))
            } else {
                Ok(receipt)
            }
        });

        let now = self.clock.now();
        let (resolution, outcome, metric) = match result {
            Ok(receipt) => {
                tracing::info!(
                    post_id = %post.id,
                    platform = %item.platform,
                    external_id = %receipt.external_id,
                    "Published to platform"
                );
                (
                    AttemptResolution::Published {
                        external_id: receipt.external_id.clone(),
                        url: receipt.url,
                        at: now,
                    },
                    PlatformOutcome::Published {
                        external_id: receipt.external_id,
                    },
                    AttemptOutcome::Published,
                )
            }
            Err(error) => match self.retry.decide(&claimed, &error, now) {
                RetryDecision::RetryAt(retry_at) => {
                    tracing::warn!(
                        post_id = %post.id,
                        platform = %item.platform,
                        attempt = claimed.attempt_count,
                        kind = %error.kind,
                        retry_at = %retry_at,
                        error = %error,
                        "Publish failed, will retry"
                    );
                    (
                        AttemptResolution::Retry {
                            error: error.message,
                            retry_at,
                        },
                        PlatformOutcome::Retrying { retry_at },
                        AttemptOutcome::Retried,
                    )
                }
                RetryDecision::GiveUp => {
                    tracing::error!(
                        post_id = %post.id,
                        platform = %item.platform,
                        attempt = claimed.attempt_count,
                        kind = %error.kind,
                        error = %error,
                        "Publish failed permanently"
                    );
                    (
                        AttemptResolution::Failed {
                            error: error.message.clone(),
                            at: now,
                        },
                        PlatformOutcome::Failed {
                            error: error.message,
                        },
                        AttemptOutcome::Failed,
                    )
                }
            },
        };

        metrics::record_publish_attempt(&item.platform, metric, elapsed);

        if !self
            .store
            .resolve_attempt(&claimed, &post.tenant_id, &resolution)?
        {
            tracing::warn!(
                queue_item_id = %item.id,
                platform = %item.platform,
                "Attempt was settled elsewhere, result dropped"
            );
            return Ok(PlatformOutcome::NotClaimed);
        }

        Ok(outcome)
    }

    /// Recompute the parent status once no item of the post is outstanding.
    ///
    /// `published` iff every target platform has a published record,
    /// otherwise `failed` naming the platforms that did not make it.
    /// Cancelled posts are left alone. Returns the new status if one was set.
    pub fn finalize_post(&self, post_id: &str) -> SchedulerResult<Option<PostStatus>> {
        let items = self.store.queue_items_for(post_id)?;
        if items.is_empty() || items.iter().any(QueueItem::is_outstanding) {
            return Ok(None);
        }

        let post = self
            .store
            .get_post(post_id)?
            .ok_or_else(|| SchedulerError::post_not_found(post_id))?;
        if !matches!(post.status, PostStatus::Scheduled | PostStatus::Publishing) {
            return Ok(None);
        }

        let records = self.store.platform_posts_for(post_id)?;
        let failed: Vec<String> = post
            .platforms
            .iter()
            .filter(|platform| {
                !records
                    .iter()
                    .any(|r| &r.platform == *platform && r.is_published())
            })
            .cloned()
            .collect();

        let (status, message) = if failed.is_empty() {
            (PostStatus::Published, None)
        } else {
            (PostStatus::Failed, Some(failed_platforms_message(&failed)))
        };

        let applied = self.store.transition_post(
            post_id,
            &[PostStatus::Scheduled, PostStatus::Publishing],
            status,
            message.as_deref(),
            self.clock.now(),
        )?;
        if !applied {
            return Ok(None);
        }

        match &message {
            None => tracing::info!(post_id, "Post published to all platforms"),
            Some(msg) => tracing::warn!(post_id, reason = %msg, "Post failed on some platforms"),
        }
        Ok(Some(status))
    }

    /// Return items stuck in `processing` past the watchdog timeout to
    /// `pending` (attempts left) or `failed` (budget spent).
    pub async fn reclaim_stuck(&self) -> SchedulerResult<usize> {
        let now = self.clock.now();
        let stuck = self.store.stuck_queue_items(now - self.stuck_after)?;
        let mut reclaimed = 0;

        for item in stuck {
            let Some(post) = self.store.get_post(&item.scheduled_post_id)? else {
                tracing::error!(queue_item_id = %item.id, "Stuck item references a missing post");
                continue;
            };

            let error = PublishError::timeout(format!(
                "publish attempt abandoned after {}s in processing",
                self.stuck_after.num_seconds()
            ));
            let resolution = match self.retry.decide(&item, &error, now) {
                RetryDecision::RetryAt(retry_at) => AttemptResolution::Retry {
                    error: error.message,
                    retry_at,
                },
                RetryDecision::GiveUp => AttemptResolution::Failed {
                    error: error.message,
                    at: now,
                },
            };

            if self.store.resolve_attempt(&item, &post.tenant_id, &resolution)? {
                reclaimed += 1;
                tracing::warn!(
                    queue_item_id = %item.id,
                    post_id = %post.id,
                    platform = %item.platform,
                    attempt = item.attempt_count,
                    "Reclaimed stuck queue item"
                );
                self.finalize_post(&post.id)?;
            }
        }

        metrics::record_reclaimed(reclaimed);
        Ok(reclaimed)
    }

    /// Refresh engagement metrics on published records never synced or
    /// synced longer ago than the staleness window. Failures are counted and
    /// logged, never returned.
    pub async fn bulk_sync_metrics(&self, tenant_id: &str) -> SchedulerResult<SyncReport> {
        let now = self.clock.now();
        let candidates = self
            .store
            .platform_posts_needing_sync(tenant_id, now - self.metrics_stale_after)?;

        let fetched: Vec<_> = stream::iter(
            candidates
                .into_iter()
                .filter_map(|record| record.external_post_id.clone().map(|ext| (record, ext))),
        )
        .map(|(record, external_id)| async move {
            let result = tokio::time::timeout(
                self.publish_timeout,
                self.metrics_provider
                    .fetch_metrics(&record.platform, &external_id),
            )
            .await
            .unwrap_or_else(|_| Err(PublishError::timeout("metrics fetch timed out")));
            (record, result)
        })
        .buffer_unordered(self.max_concurrent_posts)
        .collect()
        .await;

        let mut report = SyncReport::default();
        for (record, result) in fetched {
            let outcome = result
                .map_err(|e| e.to_string())
                .and_then(|m| {
                    self.store
                        .update_platform_metrics(&record.id, &m, now)
                        .map_err(|e| e.to_string())
                });
            match outcome {
                Ok(()) => report.synced += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        platform_post_id = %record.id,
                        platform = %record.platform,
                        error = %error,
                        "Metrics sync failed"
                    );
                }
            }
        }

        metrics::record_metrics_sync(report.synced, report.failed);
        tracing::info!(
            tenant_id,
            synced = report.synced,
            failed = report.failed,
            "Metrics sync complete"
        );
        Ok(report)
    }
}

/// Group due items by post, keeping first-seen order
fn group_by_post(items: Vec<QueueItem>) -> Vec<(String, Vec<QueueItem>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<QueueItem>)> = Vec::new();
    for item in items {
        match index.get(&item.scheduled_post_id) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(item.scheduled_post_id.clone(), groups.len());
                groups.push((item.scheduled_post_id.clone(), vec![item]));
            }
        }
    }
    groups
}
