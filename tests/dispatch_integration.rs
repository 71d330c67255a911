//! Integration tests for queue dispatch
//!
//! These tests drive the coordinator and dispatcher together against an
//! in-memory store:
//! - Partial multi-platform failure and retry exhaustion
//! - Idempotent passes and completed items
//! - The stuck-item watchdog
//! - Competing dispatchers claiming the same items
//! - Posts awaiting approval never blocking the batch

mod common;

use chrono::Duration;
use common::{ScriptedPublisher, TestEnv, TENANT};
use postqueue::config::DispatcherConfig;
use postqueue::models::{PlatformPostStatus, PostStatus, QueueStatus};
use postqueue::publisher::PublishError;
use postqueue::scheduler::{NewPost, RetryClassification};
use postqueue::storage::SchedulingStore;
use std::sync::Arc;

// ============================================================================
// Partial failure
// ============================================================================

#[tokio::test]
async fn test_one_platform_exhausts_retries_other_stays_published() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default().failing("linkedin", 10));
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["facebook", "linkedin"]);

    let first = dispatcher.tick().await.unwrap();
    assert_eq!(first.dispatch.succeeded, 1);
    assert_eq!(first.dispatch.retried, 1);

    // Still publishing while linkedin has attempts left
    let post = env.store.get_post(&post_id).unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Publishing);

    for _ in 0..2 {
        env.clock.advance(Duration::minutes(5));
        dispatcher.tick().await.unwrap();
    }

    let post = env.store.get_post(&post_id).unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.error_message.as_deref(), Some("Failed to publish to: linkedin"));

    let records = env.store.platform_posts_for(&post_id).unwrap();
    let facebook = records.iter().find(|r| r.platform == "facebook").unwrap();
    let linkedin = records.iter().find(|r| r.platform == "linkedin").unwrap();
    assert!(facebook.is_published());
    assert_eq!(facebook.external_post_id.as_deref(), Some("facebook-123"));
    assert_eq!(linkedin.status, PlatformPostStatus::Failed);
    assert_eq!(linkedin.error_message.as_deref(), Some("503 Service Unavailable"));

    let items = env.store.queue_items_for(&post_id).unwrap();
    let linkedin_item = items.iter().find(|i| i.platform == "linkedin").unwrap();
    assert_eq!(linkedin_item.status, QueueStatus::Failed);
    assert_eq!(linkedin_item.attempt_count, linkedin_item.max_attempts);

    // Budget spent: later passes never call linkedin again
    env.clock.advance(Duration::hours(1));
    dispatcher.tick().await.unwrap();
    assert_eq!(publisher.calls_for("linkedin"), 3);
    assert_eq!(publisher.calls_for("facebook"), 1);
}

#[tokio::test]
async fn test_retry_is_not_due_before_backoff() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default().failing("instagram", 1));
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["instagram"]);

    dispatcher.tick().await.unwrap();
    env.clock.advance(Duration::minutes(4));
    let early = dispatcher.tick().await.unwrap();
    assert_eq!(early.dispatch, Default::default());

    env.clock.advance(Duration::minutes(1));
    let due = dispatcher.tick().await.unwrap();
    assert_eq!(due.dispatch.succeeded, 1);
    assert_eq!(
        env.store.get_post(&post_id).unwrap().unwrap().status,
        PostStatus::Published
    );
}

#[tokio::test]
async fn test_transient_only_stops_on_permanent_failure() {
    let env = TestEnv::new();
    let publisher = Arc::new(
        ScriptedPublisher::default().failing_with(
            "twitter",
            10,
            PublishError::permanent("Duplicate content"),
        ),
    );
    let config = DispatcherConfig {
        retry_classification: RetryClassification::TransientOnly,
        ..Default::default()
    };
    let dispatcher = env.dispatcher_with(publisher.clone(), &config);
    let post_id = env.schedule_now(&["twitter"]);

    let report = dispatcher.tick().await.unwrap();
    assert_eq!(report.dispatch.failed, 1);
    assert_eq!(report.dispatch.retried, 0);

    let post = env.store.get_post(&post_id).unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(publisher.calls_for("twitter"), 1);
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["facebook", "instagram"]);

    dispatcher.process_due().await.unwrap();
    let post_before = env.store.get_post(&post_id).unwrap().unwrap();
    let items_before = env.store.queue_items_for(&post_id).unwrap();
    let records_before = env.store.platform_posts_for(&post_id).unwrap();

    let second = dispatcher.process_due().await.unwrap();

    assert_eq!(second, Default::default());
    assert_eq!(env.store.get_post(&post_id).unwrap().unwrap(), post_before);
    assert_eq!(env.store.queue_items_for(&post_id).unwrap(), items_before);
    assert_eq!(env.store.platform_posts_for(&post_id).unwrap(), records_before);
    assert_eq!(publisher.total_calls(), 2);
}

#[tokio::test]
async fn test_completed_items_are_never_reprocessed() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["tiktok"]);

    dispatcher.tick().await.unwrap();
    for _ in 0..5 {
        env.clock.advance(Duration::minutes(30));
        dispatcher.tick().await.unwrap();
    }

    assert_eq!(publisher.calls_for("tiktok"), 1);
    let items = env.store.queue_items_for(&post_id).unwrap();
    assert_eq!(items[0].status, QueueStatus::Completed);
    assert_eq!(items[0].attempt_count, 1);
}

#[tokio::test]
async fn test_future_posts_wait_for_their_time() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_at(&["facebook"], env.now() + Duration::hours(2));

    assert_eq!(dispatcher.tick().await.unwrap().dispatch.succeeded, 0);

    env.clock.advance(Duration::hours(2));
    assert_eq!(dispatcher.tick().await.unwrap().dispatch.succeeded, 1);
    assert_eq!(
        env.store.get_post(&post_id).unwrap().unwrap().status,
        PostStatus::Published
    );
}

// ============================================================================
// Watchdog
// ============================================================================

#[tokio::test]
async fn test_abandoned_claim_is_reclaimed_and_published() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["linkedin"]);

    // A worker claims the item and dies before resolving it
    let item = env.store.queue_items_for(&post_id).unwrap().remove(0);
    assert!(env.store.claim_queue_item(&item.id, TENANT, env.now()).unwrap());

    env.clock.advance(Duration::minutes(5));
    let report = dispatcher.tick().await.unwrap();
    assert_eq!(report.reclaimed, 0);
    assert_eq!(publisher.total_calls(), 0);

    env.clock.advance(Duration::minutes(6));
    let report = dispatcher.tick().await.unwrap();
    assert_eq!(report.reclaimed, 1);

    let item = env.store.get_queue_item(&item.id).unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.attempt_count, 1);

    env.clock.advance(Duration::minutes(5));
    dispatcher.tick().await.unwrap();
    assert_eq!(
        env.store.get_post(&post_id).unwrap().unwrap().status,
        PostStatus::Published
    );
}

// ============================================================================
// Claim serialization
// ============================================================================

#[tokio::test]
async fn test_competing_dispatchers_publish_each_item_once() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let first = env.dispatcher(publisher.clone());
    let second = env.dispatcher(publisher.clone());

    let posts: Vec<String> = (0..5)
        .map(|_| env.schedule_now(&["facebook", "instagram", "linkedin"]))
        .collect();

    let (a, b) = tokio::join!(first.process_due(), second.process_due());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.succeeded + b.succeeded, 15);
    assert_eq!(publisher.total_calls(), 15);
    for post_id in posts {
        assert_eq!(
            env.store.get_post(&post_id).unwrap().unwrap().status,
            PostStatus::Published
        );
    }
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_post_is_not_dispatched() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["facebook"]);

    env.coordinator().cancel(TENANT, &post_id).unwrap();
    let report = dispatcher.tick().await.unwrap();

    assert_eq!(report.dispatch.succeeded, 0);
    assert_eq!(publisher.total_calls(), 0);
    assert_eq!(
        env.store.get_post(&post_id).unwrap().unwrap().status,
        PostStatus::Cancelled
    );
}

#[tokio::test]
async fn test_unapproved_posts_do_not_fill_the_batch() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let config = DispatcherConfig {
        batch_size: 1,
        ..DispatcherConfig::default()
    };
    let dispatcher = env.dispatcher_with(publisher.clone(), &config);

    let waiting = env
        .coordinator()
        .create_post(NewPost {
            tenant_id: TENANT.into(),
            account_id: common::ACCOUNT.into(),
            content: "Needs sign-off".into(),
            platforms: vec!["facebook".into()],
            scheduled_at: Some(env.now()),
            requires_approval: true,
            ..Default::default()
        })
        .unwrap()
        .post
        .id;
    let ready = env.schedule_at(&["linkedin"], env.now() + Duration::minutes(1));
    env.clock.advance(Duration::minutes(1));

    let report = dispatcher.process_due().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(publisher.calls_for("linkedin"), 1);
    assert_eq!(publisher.calls_for("facebook"), 0);
    assert_eq!(
        env.store.get_post(&ready).unwrap().unwrap().status,
        PostStatus::Published
    );

    // The waiting post keeps its item and budget until approved
    let item = &env.queue_items(&waiting)[0];
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.attempt_count, 0);

    env.coordinator().approve(TENANT, &waiting).unwrap();
    let report = dispatcher.process_due().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(
        env.store.get_post(&waiting).unwrap().unwrap().status,
        PostStatus::Published
    );
}

#[tokio::test]
async fn test_rejected_post_releases_its_items() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["facebook", "instagram"]);

    env.coordinator().reject(TENANT, &post_id).unwrap();
    let report = dispatcher.tick().await.unwrap();

    assert_eq!(report.dispatch.succeeded, 0);
    assert_eq!(publisher.total_calls(), 0);
    for item in env.queue_items(&post_id) {
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.last_error.as_deref(), Some("rejected"));
        assert_eq!(item.attempt_count, 0);
    }
}

#[tokio::test]
async fn test_reschedule_after_failure_publishes_remaining_platform() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default().failing("linkedin", 3));
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["facebook", "linkedin"]);

    for _ in 0..3 {
        dispatcher.tick().await.unwrap();
        env.clock.advance(Duration::minutes(5));
    }
    assert_eq!(
        env.store.get_post(&post_id).unwrap().unwrap().status,
        PostStatus::Failed
    );

    let retry_at = env.now() + Duration::minutes(30);
    let post = env.coordinator().reschedule(TENANT, &post_id, retry_at).unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert!(post.error_message.is_none());

    env.clock.advance(Duration::minutes(30));
    dispatcher.tick().await.unwrap();

    let post = env.store.get_post(&post_id).unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Published);
    // facebook was already published and is not sent twice
    assert_eq!(publisher.calls_for("facebook"), 1);
    assert_eq!(publisher.calls_for("linkedin"), 4);
}

// ============================================================================
// Metrics sync
// ============================================================================

#[tokio::test]
async fn test_bulk_sync_updates_published_records() {
    let env = TestEnv::new();
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher.clone());
    let post_id = env.schedule_now(&["facebook"]);
    dispatcher.tick().await.unwrap();

    let report = dispatcher.bulk_sync_metrics(TENANT).await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);

    let record = env.store.platform_posts_for(&post_id).unwrap().remove(0);
    let metrics = record.metrics.unwrap();
    assert_eq!(metrics.likes, 500);
    assert!((metrics.engagement_rate() - 2.9).abs() < 1e-9);
    assert_eq!(record.last_synced_at, Some(env.now()));

    // Fresh records are skipped until they go stale
    let again = dispatcher.bulk_sync_metrics(TENANT).await.unwrap();
    assert_eq!(again.synced, 0);
}
