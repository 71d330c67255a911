//! Integration tests for the engagement feedback loop:
//! publish, sync metrics, score, rebuild best times, suggest a time.

mod common;

use chrono::{Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use common::{ScriptedPublisher, TestEnv, TENANT};
use postqueue::analytics::{BestTimeAnalyzer, PerformanceLabel, PerformanceScorer, DEFAULT_GROUP};
use postqueue::models::EngagementMetrics;
use postqueue::scheduler::SuggestionSource;
use postqueue::storage::SchedulingStore;
use std::sync::Arc;

/// Wednesday 2024-03-06 18:00 UTC
fn wednesday_6pm() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 18, 0, 0).unwrap()
}

#[tokio::test]
async fn test_published_history_drives_time_suggestion() {
    let env = TestEnv::at(wednesday_6pm());
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher);

    env.schedule_now(&["facebook"]);
    dispatcher.tick().await.unwrap();
    let sync = dispatcher.bulk_sync_metrics(TENANT).await.unwrap();
    assert_eq!(sync.synced, 1);

    let analyzer = BestTimeAnalyzer::new(
        env.store.clone(),
        env.clock.clone(),
        FixedOffset::east_opt(0).unwrap(),
    );
    let refresh = analyzer.refresh_best_times(TENANT).unwrap();
    assert_eq!(refresh.cells_updated, 1);

    let coordinator = env.coordinator();
    let next_wednesday = NaiveDate::from_ymd_opt(2024, 3, 13).unwrap();
    let suggestion = coordinator
        .slots()
        .suggest_time(TENANT, "facebook", Some(next_wednesday))
        .unwrap();
    assert_eq!(
        suggestion.suggested_at,
        Utc.with_ymd_and_hms(2024, 3, 13, 18, 0, 0).unwrap()
    );
    match suggestion.source {
        SuggestionSource::Recommendation {
            engagement_score,
            sample_size,
        } => {
            assert!((engagement_score - 29.0).abs() < 1e-9);
            assert_eq!(sample_size, 1);
        }
        SuggestionSource::Fallback => panic!("Expected a recommendation"),
    }

    // No history for Thursdays: configured fallback hour
    let thursday = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
    let fallback = coordinator
        .slots()
        .suggest_time(TENANT, "facebook", Some(thursday))
        .unwrap();
    assert_eq!(fallback.source, SuggestionSource::Fallback);
    assert_eq!(
        fallback.suggested_at,
        Utc.with_ymd_and_hms(2024, 3, 14, 10, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_scores_rank_against_recorded_history() {
    let env = TestEnv::at(wednesday_6pm());
    let publisher = Arc::new(ScriptedPublisher::default());
    let dispatcher = env.dispatcher(publisher);

    let posts: Vec<String> = (0..3).map(|_| env.schedule_now(&["instagram"])).collect();
    dispatcher.tick().await.unwrap();
    dispatcher.bulk_sync_metrics(TENANT).await.unwrap();

    let record = |post_id: &str| env.store.platform_posts_for(post_id).unwrap().remove(0);
    let scorer = PerformanceScorer::default();

    // Empty comparison set: median assumption
    let first = scorer
        .score_and_record(env.store.as_ref(), &record(&posts[0]), DEFAULT_GROUP, env.now())
        .unwrap();
    assert_eq!(first.percentile_rank, 50);
    assert_eq!(first.label, PerformanceLabel::Average);
    assert!((first.engagement_rate - 2.9).abs() < 1e-9);

    // Same score as the only peer: nothing strictly below it
    let second = scorer
        .score_and_record(env.store.as_ref(), &record(&posts[1]), DEFAULT_GROUP, env.now())
        .unwrap();
    assert_eq!(second.percentile_rank, 0);
    assert_eq!(second.label, PerformanceLabel::LowPerformer);

    // A standout post beats all recorded peers
    let standout = record(&posts[2]);
    env.store
        .update_platform_metrics(
            &standout.id,
            &EngagementMetrics {
                likes: 4_000,
                comments: 600,
                shares: 700,
                saves: Some(1_200),
                reach: Some(60_000),
                impressions: Some(120_000),
            },
            env.now() + Duration::minutes(1),
        )
        .unwrap();
    let third = scorer
        .score_and_record(env.store.as_ref(), &record(&posts[2]), DEFAULT_GROUP, env.now())
        .unwrap();
    assert_eq!(third.percentile_rank, 100);
    assert_eq!(third.label, PerformanceLabel::HighPerformer);
    assert!(third.score > first.score);
    assert!(third.hypothesis.contains("shares"));
}
