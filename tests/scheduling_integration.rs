//! Integration tests for slot resolution, conflicts and post lifecycle

mod common;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use common::{TestEnv, ACCOUNT, TENANT};
use postqueue::models::PostStatus;
use postqueue::scheduler::{
    BulkStrategy, NewPost, ResolutionStrategy, SchedulerError, SettingsUpdate,
};
use proptest::prelude::*;

fn weekday_settings(times: &[&str]) -> SettingsUpdate {
    SettingsUpdate {
        enabled: true,
        posting_times: times.iter().map(|t| t.to_string()).collect(),
        days_enabled: vec![1, 2, 3, 4, 5],
        posts_per_day: 3,
    }
}

fn env_with_settings(now: DateTime<Utc>, times: &[&str]) -> TestEnv {
    let env = TestEnv::at(now);
    env.coordinator()
        .save_queue_settings(TENANT, ACCOUNT, "facebook", weekday_settings(times))
        .unwrap();
    env
}

// ============================================================================
// Slot Resolution
// ============================================================================

#[test]
fn test_next_slot_later_today() {
    let env = env_with_settings(common::wednesday_10am(), &["09:00", "14:00"]);
    let slot = env.coordinator().slots().next_slot(TENANT, ACCOUNT).unwrap();
    assert_eq!(slot, Utc.with_ymd_and_hms(2024, 3, 6, 14, 0, 0).unwrap());
}

#[test]
fn test_next_slot_rolls_over_weekend() {
    let friday_3pm = Utc.with_ymd_and_hms(2024, 3, 8, 15, 0, 0).unwrap();
    let env = env_with_settings(friday_3pm, &["09:00", "14:00"]);
    let slot = env.coordinator().slots().next_slot(TENANT, ACCOUNT).unwrap();
    assert_eq!(slot, Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap());
    assert_eq!(slot.weekday(), Weekday::Mon);
}

#[test]
fn test_next_slot_disabled_is_not_configured() {
    let env = TestEnv::new();
    let coordinator = env.coordinator();
    coordinator
        .save_queue_settings(
            TENANT,
            ACCOUNT,
            "facebook",
            SettingsUpdate {
                enabled: false,
                ..weekday_settings(&["09:00"])
            },
        )
        .unwrap();

    let err = coordinator.slots().next_slot(TENANT, ACCOUNT).unwrap_err();
    assert!(matches!(err, SchedulerError::NotConfigured { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_unsaved_defaults_are_disabled() {
    let env = TestEnv::new();
    let coordinator = env.coordinator();

    let settings = coordinator.queue_settings(TENANT, ACCOUNT, "linkedin").unwrap();
    assert!(!settings.enabled);
    assert_eq!(settings.posting_times.len(), 3);

    let stats = coordinator.queue_statistics(TENANT, ACCOUNT).unwrap();
    assert_eq!(stats.next_slot, None);
    assert_eq!(stats.slots_available_today, 0);
}

#[test]
fn test_queue_statistics_counts_scheduled_posts() {
    let env = env_with_settings(common::wednesday_10am(), &["09:00", "14:00", "18:00"]);
    env.schedule_at(&["facebook"], env.now() + Duration::hours(4));
    env.schedule_at(&["instagram"], env.now() + Duration::days(1));

    let stats = env.coordinator().queue_statistics(TENANT, ACCOUNT).unwrap();
    assert_eq!(stats.total_queued, 2);
    assert_eq!(stats.slots_available_today, 2);
    assert_eq!(
        stats.next_slot,
        Some(Utc.with_ymd_and_hms(2024, 3, 6, 14, 0, 0).unwrap())
    );
}

#[test]
fn test_settings_validation() {
    let env = TestEnv::new();
    let coordinator = env.coordinator();

    let bad_time = coordinator.save_queue_settings(
        TENANT,
        ACCOUNT,
        "facebook",
        weekday_settings(&["9am"]),
    );
    assert!(matches!(bad_time, Err(SchedulerError::InvalidSchedule { .. })));

    let bad_day = coordinator.save_queue_settings(
        TENANT,
        ACCOUNT,
        "facebook",
        SettingsUpdate {
            days_enabled: vec![7],
            ..weekday_settings(&["09:00"])
        },
    );
    assert!(matches!(bad_day, Err(SchedulerError::InvalidSchedule { .. })));
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn test_conflicts_reported_on_create() {
    let env = TestEnv::new();
    let noon = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
    let first = env.schedule_at(&["facebook", "instagram"], noon);

    let saved = env
        .coordinator()
        .create_post(NewPost {
            tenant_id: TENANT.into(),
            account_id: ACCOUNT.into(),
            content: "Follow-up".into(),
            platforms: vec!["facebook".into(), "linkedin".into()],
            scheduled_at: Some(noon + Duration::minutes(14)),
            ..Default::default()
        })
        .unwrap();

    // Advisory only: the post is stored anyway
    assert_eq!(saved.post.status, PostStatus::Scheduled);
    assert_eq!(saved.conflicts.len(), 1);
    let hits = &saved.conflicts["facebook"];
    assert_eq!(hits[0].post_id, first);
    assert_eq!(hits[0].minutes_apart, -14);
}

#[test]
fn test_resolve_conflicts_spaces_posts() {
    let env = TestEnv::new();
    let noon = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
    let a = env.schedule_at(&["facebook"], noon);
    let b = env.schedule_at(&["facebook"], noon + Duration::minutes(5));
    let c = env.schedule_at(&["facebook"], noon + Duration::minutes(10));

    let coordinator = env.coordinator();
    let moves = coordinator
        .resolve_conflicts(
            TENANT,
            ACCOUNT,
            noon - Duration::hours(1),
            noon + Duration::hours(1),
            ResolutionStrategy::SpaceEvenly,
        )
        .unwrap();

    assert_eq!(moves.len(), 2);
    let at = |id: &str| coordinator.post_detail(TENANT, id).unwrap().post.scheduled_at;
    assert_eq!(at(&a), Some(noon));
    assert_eq!(at(&b), Some(noon + Duration::hours(2)));
    assert_eq!(at(&c), Some(noon + Duration::hours(4)));

    let remaining = coordinator
        .conflicts()
        .find_queue_conflicts(TENANT, ACCOUNT, noon, noon + Duration::hours(5))
        .unwrap();
    assert!(remaining.is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_draft_then_publish_now() {
    let env = TestEnv::new();
    let coordinator = env.coordinator();
    let saved = coordinator
        .create_post(NewPost {
            tenant_id: TENANT.into(),
            account_id: ACCOUNT.into(),
            content: "Draft".into(),
            platforms: vec!["Facebook".into(), "facebook".into(), "tiktok".into()],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(saved.post.status, PostStatus::Draft);
    assert_eq!(saved.post.platforms, vec!["facebook", "tiktok"]);
    assert!(env.queue_items(&saved.post.id).is_empty());

    let post = coordinator.publish_now(TENANT, &saved.post.id).unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert_eq!(post.scheduled_at, Some(env.now()));
    assert_eq!(env.queue_items(&saved.post.id).len(), 2);
}

#[test]
fn test_other_tenant_cannot_touch_post() {
    let env = TestEnv::new();
    let post_id = env.schedule_at(&["facebook"], env.now() + Duration::hours(1));

    let err = env.coordinator().cancel("tenant-2", &post_id).unwrap_err();
    assert!(matches!(err, SchedulerError::PostNotFound { .. }));
}

#[test]
fn test_bulk_reschedule_one_post_per_day() {
    let env = TestEnv::new();
    let coordinator = env.coordinator();
    let ids = vec![
        env.schedule_at(&["facebook"], Utc.with_ymd_and_hms(2024, 3, 6, 16, 30, 0).unwrap()),
        env.schedule_at(&["facebook"], Utc.with_ymd_and_hms(2024, 3, 7, 8, 15, 0).unwrap()),
        "missing".to_string(),
    ];
    let start = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();

    let report = coordinator
        .bulk_reschedule(TENANT, &ids, start, BulkStrategy::PreserveTime)
        .unwrap();

    assert_eq!(report.moved.len(), 2);
    assert_eq!(report.moved[0].to, Utc.with_ymd_and_hms(2024, 3, 11, 16, 30, 0).unwrap());
    assert_eq!(report.moved[1].to, Utc.with_ymd_and_hms(2024, 3, 12, 8, 15, 0).unwrap());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].post_id, "missing");
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_conflict_window_is_symmetric(offset in -40i64..=40) {
        let env = TestEnv::new();
        let base = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
        let other = base + Duration::minutes(offset);
        let first = env.schedule_at(&["facebook"], base);
        let second = env.schedule_at(&["facebook"], other);

        let detector = env.coordinator();
        let platforms = vec!["facebook".to_string()];
        let from_first = detector
            .conflicts()
            .find_conflicts(TENANT, ACCOUNT, base, &platforms, Some(&first))
            .unwrap();
        let from_second = detector
            .conflicts()
            .find_conflicts(TENANT, ACCOUNT, other, &platforms, Some(&second))
            .unwrap();

        let expected = offset.abs() <= 15;
        prop_assert_eq!(from_first.contains_key("facebook"), expected);
        prop_assert_eq!(from_second.contains_key("facebook"), expected);
    }

    #[test]
    fn prop_next_slot_is_strictly_after_now(
        day_offset in 0i64..7,
        minute_of_day in 0u32..1440,
        hours in proptest::collection::btree_set(0u32..24, 1..5),
        days in proptest::collection::btree_set(0u32..7, 1..7),
    ) {
        let now = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap()
            + Duration::days(day_offset)
            + Duration::minutes(minute_of_day as i64);
        let env = TestEnv::at(now);
        let coordinator = env.coordinator();
        let times: Vec<String> = hours.iter().map(|h| format!("{h:02}:00")).collect();
        coordinator
            .save_queue_settings(
                TENANT,
                ACCOUNT,
                "facebook",
                SettingsUpdate {
                    enabled: true,
                    posting_times: times,
                    days_enabled: days.iter().copied().collect(),
                    posts_per_day: 3,
                },
            )
            .unwrap();

        let slot = coordinator.slots().next_slot(TENANT, ACCOUNT).unwrap();
        prop_assert!(slot > now);
        prop_assert!(slot - now <= Duration::days(8));
        prop_assert!(hours.contains(&slot.hour()));
        prop_assert!(days.contains(&slot.weekday().num_days_from_sunday()));
    }
}
