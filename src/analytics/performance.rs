//! Percentile-based performance scoring for published posts
//!
//! A post's raw engagement numbers are folded into one composite score in
//! `[0, 1]`. The label comes from where that score sits among the tenant's
//! earlier posts on the same platform and group, not from the score alone.
//!
//! Composite weights:
//!
//! | metric          | weight |
//! |-----------------|--------|
//! | engagement rate | 0.40   |
//! | reach           | 0.20   |
//! | impressions     | 0.15   |
//! | saves           | 0.10   |
//! | shares          | 0.10   |
//! | comments        | 0.05   |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ScoringConfig;
use crate::models::{EngagementMetrics, PlatformPost};
use crate::storage::{SchedulingStore, ScoreRecord, StorageError, StorageResult};

/// Group used when the caller does not segment posts
pub const DEFAULT_GROUP: &str = "all";

const WEIGHT_ENGAGEMENT_RATE: f64 = 0.40;
const WEIGHT_REACH: f64 = 0.20;
const WEIGHT_IMPRESSIONS: f64 = 0.15;
const WEIGHT_SAVES: f64 = 0.10;
const WEIGHT_SHARES: f64 = 0.10;
const WEIGHT_COMMENTS: f64 = 0.05;

/// Percentile assumed when there is nothing to compare against
const MEDIAN_PERCENTILE: u8 = 50;

// Absolute thresholds for the explanatory text
const NOTABLE_ENGAGEMENT_RATE: f64 = 5.0;
const NOTABLE_SAVES: u64 = 100;
const NOTABLE_SHARES: u64 = 50;
const NOTABLE_REACH: u64 = 10_000;
const NOTABLE_COMMENTS: u64 = 50;

/// Performance bucket derived from percentile rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLabel {
    HighPerformer,
    Average,
    LowPerformer,
}

impl PerformanceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighPerformer => "high_performer",
            Self::Average => "average",
            Self::LowPerformer => "low_performer",
        }
    }
}

impl fmt::Display for PerformanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring outcome for one post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Weighted composite in `[0, 1]`
    pub score: f64,
    pub label: PerformanceLabel,
    /// Share of peers with a strictly lower score, `0..=100`
    pub percentile_rank: u8,
    pub engagement_rate: f64,
    /// Descriptive only, never feeds the score
    pub hypothesis: String,
}

/// Scores posts against configurable ceilings and label thresholds
#[derive(Debug, Clone, Default)]
pub struct PerformanceScorer {
    config: ScoringConfig,
}

impl PerformanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Weighted composite of the normalized metrics, clamped to `[0, 1]`
    pub fn composite_score(&self, metrics: &EngagementMetrics) -> f64 {
        let c = &self.config;
        let composite = WEIGHT_ENGAGEMENT_RATE
            * normalize(metrics.engagement_rate(), c.engagement_rate_ceiling)
            + WEIGHT_REACH * normalize(metrics.reach.unwrap_or(0) as f64, c.reach_ceiling)
            + WEIGHT_IMPRESSIONS
                * normalize(metrics.impressions.unwrap_or(0) as f64, c.impressions_ceiling)
            + WEIGHT_SAVES * normalize(metrics.saves.unwrap_or(0) as f64, c.saves_ceiling)
            + WEIGHT_SHARES * normalize(metrics.shares as f64, c.shares_ceiling)
            + WEIGHT_COMMENTS * normalize(metrics.comments as f64, c.comments_ceiling);
        composite.clamp(0.0, 1.0)
    }

    /// Label for a percentile under the configured thresholds
    pub fn label_for(&self, percentile_rank: u8) -> PerformanceLabel {
        if percentile_rank >= self.config.high_performer_percentile {
            PerformanceLabel::HighPerformer
        } else if percentile_rank >= self.config.average_percentile {
            PerformanceLabel::Average
        } else {
            PerformanceLabel::LowPerformer
        }
    }

    /// Score `metrics` and rank the result among `peers`
    pub fn score(&self, metrics: &EngagementMetrics, peers: &[f64]) -> ScoreResult {
        let score = self.composite_score(metrics);
        let percentile_rank = percentile_rank(score, peers);
        ScoreResult {
            score,
            label: self.label_for(percentile_rank),
            percentile_rank,
            engagement_rate: metrics.engagement_rate(),
            hypothesis: hypothesis(metrics),
        }
    }

    /// Score a published record against its stored peers without saving
    pub fn evaluate(
        &self,
        store: &dyn SchedulingStore,
        record: &PlatformPost,
        group_key: &str,
    ) -> StorageResult<ScoreResult> {
        let metrics = record.metrics.ok_or_else(|| {
            StorageError::corrupt("platform_posts", format!("{} has no metrics yet", record.id))
        })?;
        let peers = store.historical_scores(
            &record.tenant_id,
            &record.platform,
            group_key,
            Some(&record.id),
        )?;
        Ok(self.score(&metrics, &peers))
    }

    /// Score a record and add it to the comparison history
    pub fn score_and_record(
        &self,
        store: &dyn SchedulingStore,
        record: &PlatformPost,
        group_key: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<ScoreResult> {
        let result = self.evaluate(store, record, group_key)?;
        store.record_score(&ScoreRecord {
            platform_post_id: record.id.clone(),
            tenant_id: record.tenant_id.clone(),
            platform: record.platform.clone(),
            group_key: group_key.to_string(),
            score: result.score,
            label: result.label.as_str().to_string(),
            percentile_rank: result.percentile_rank,
            scored_at: now,
        })?;

        tracing::debug!(
            platform_post_id = %record.id,
            platform = %record.platform,
            score = result.score,
            percentile = result.percentile_rank,
            label = %result.label,
            "Post scored"
        );
        Ok(result)
    }
}

fn normalize(value: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / ceiling).clamp(0.0, 1.0)
}

/// Percentage of `peers` strictly below `score`, rounded. 50 with no peers.
pub fn percentile_rank(score: f64, peers: &[f64]) -> u8 {
    if peers.is_empty() {
        return MEDIAN_PERCENTILE;
    }
    let lower = peers.iter().filter(|p| **p < score).count();
    let rank = (lower as f64 / peers.len() as f64 * 100.0).round();
    rank.clamp(0.0, 100.0) as u8
}

/// Plain-language reasons a post stood out
pub fn hypothesis(metrics: &EngagementMetrics) -> String {
    let mut reasons = Vec::new();

    let rate = metrics.engagement_rate();
    if rate > NOTABLE_ENGAGEMENT_RATE {
        reasons.push(format!("strong engagement rate ({rate:.1}%)"));
    }
    if let Some(saves) = metrics.saves.filter(|s| *s > NOTABLE_SAVES) {
        reasons.push(format!("{saves} saves suggest lasting reference value"));
    }
    if metrics.shares > NOTABLE_SHARES {
        reasons.push(format!("{} shares extended organic reach", metrics.shares));
    }
    if let Some(reach) = metrics.reach.filter(|r| *r > NOTABLE_REACH) {
        reasons.push(format!("reached {reach} accounts"));
    }
    if metrics.comments > NOTABLE_COMMENTS {
        reasons.push(format!("{} comments started a conversation", metrics.comments));
    }

    if reasons.is_empty() {
        return "No metric stood out against the absolute thresholds".to_string();
    }
    let text = reasons.join("; ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlatformPostStatus, ScheduledPost};
    use crate::storage::SqliteStore;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sample() -> EngagementMetrics {
        EngagementMetrics {
            likes: 500,
            comments: 50,
            shares: 30,
            reach: Some(20_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_engagement_rate_example() {
        let rate = sample().engagement_rate();
        assert!((rate - 2.9).abs() < 1e-9);
    }

    #[test]
    fn test_composite_is_moderate() {
        let scorer = PerformanceScorer::default();
        let score = scorer.composite_score(&sample());
        // 0.4*0.29 + 0.2*0.4 + 0.1*0.06 + 0.05*0.1
        assert!((score - 0.207).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_rank() {
        assert_eq!(percentile_rank(0.5, &[]), 50);
        assert_eq!(percentile_rank(0.5, &[0.1, 0.2, 0.6, 0.9]), 50);
        assert_eq!(percentile_rank(0.5, &[0.5, 0.5]), 0);
        assert_eq!(percentile_rank(1.0, &[0.1, 0.2, 0.3]), 100);
        assert_eq!(percentile_rank(0.25, &[0.1, 0.2, 0.3]), 67);
    }

    #[test]
    fn test_labels_follow_configured_thresholds() {
        let scorer = PerformanceScorer::default();
        assert_eq!(scorer.label_for(75), PerformanceLabel::HighPerformer);
        assert_eq!(scorer.label_for(74), PerformanceLabel::Average);
        assert_eq!(scorer.label_for(40), PerformanceLabel::Average);
        assert_eq!(scorer.label_for(39), PerformanceLabel::LowPerformer);

        let strict = PerformanceScorer::new(ScoringConfig {
            high_performer_percentile: 90,
            average_percentile: 50,
            ..Default::default()
        });
        assert_eq!(strict.label_for(75), PerformanceLabel::Average);
        assert_eq!(strict.label_for(45), PerformanceLabel::LowPerformer);
    }

    #[test]
    fn test_label_depends_on_peers() {
        let scorer = PerformanceScorer::default();
        let weak_peers = scorer.score(&sample(), &[0.01, 0.02, 0.05, 0.1]);
        assert_eq!(weak_peers.label, PerformanceLabel::HighPerformer);

        let strong_peers = scorer.score(&sample(), &[0.5, 0.6, 0.7, 0.8]);
        assert_eq!(strong_peers.label, PerformanceLabel::LowPerformer);
        assert_eq!(weak_peers.score, strong_peers.score);
    }

    #[test]
    fn test_hypothesis_text() {
        let quiet = EngagementMetrics {
            likes: 3,
            reach: Some(1_000),
            ..Default::default()
        };
        assert!(hypothesis(&quiet).starts_with("No metric"));

        let viral = EngagementMetrics {
            likes: 900,
            comments: 80,
            shares: 120,
            saves: Some(300),
            reach: Some(15_000),
            impressions: None,
        };
        let text = hypothesis(&viral);
        assert!(text.starts_with("Strong engagement rate"));
        assert!(text.contains("300 saves"));
        assert!(text.contains("120 shares"));
        assert!(text.contains("15000 accounts"));
        assert!(text.contains("80 comments"));
    }

    #[test]
    fn test_score_and_record_builds_history() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap();
        let scorer = PerformanceScorer::default();

        let mut results = Vec::new();
        for likes in [10_u64, 100, 1_000] {
            let post = ScheduledPost::new_draft("t1", "acc1", "c", vec!["facebook".into()], now);
            store.insert_post(&post).unwrap();
            let mut record = PlatformPost::new(&post, "facebook");
            record.status = PlatformPostStatus::Published;
            record.external_post_id = Some(format!("fb-{likes}"));
            record.metrics = Some(EngagementMetrics {
                likes,
                reach: Some(5_000),
                ..Default::default()
            });
            store.upsert_platform_post(&record).unwrap();
            results.push(
                scorer
                    .score_and_record(&store, &record, DEFAULT_GROUP, now)
                    .unwrap(),
            );
        }

        assert_eq!(results[0].percentile_rank, 50);
        assert_eq!(results[1].percentile_rank, 100);
        assert_eq!(results[2].percentile_rank, 100);
        assert_eq!(
            store
                .historical_scores("t1", "facebook", DEFAULT_GROUP, None)
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_evaluate_without_metrics_fails() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap();
        let post = ScheduledPost::new_draft("t1", "acc1", "c", vec!["facebook".into()], now);
        let record = PlatformPost::new(&post, "facebook");
        assert!(PerformanceScorer::default()
            .evaluate(&store, &record, DEFAULT_GROUP)
            .is_err());
    }

    fn metrics_strategy() -> impl Strategy<Value = EngagementMetrics> {
        (
            0u64..10_000_000,
            0u64..1_000_000,
            0u64..1_000_000,
            proptest::option::of(0u64..1_000_000),
            proptest::option::of(0u64..100_000_000),
            proptest::option::of(0u64..100_000_000),
        )
            .prop_map(|(likes, comments, shares, saves, reach, impressions)| EngagementMetrics {
                likes,
                comments,
                shares,
                saves,
                reach,
                impressions,
            })
    }

    proptest! {
        #[test]
        fn test_score_is_bounded(metrics in metrics_strategy()) {
            let score = PerformanceScorer::default().composite_score(&metrics);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn test_percentile_is_bounded(
            score in 0.0f64..=1.0,
            peers in proptest::collection::vec(0.0f64..=1.0, 0..50),
        ) {
            let rank = percentile_rank(score, &peers);
            prop_assert!(rank <= 100);
        }

        #[test]
        fn test_label_is_deterministic(rank in 0u8..=100) {
            let scorer = PerformanceScorer::default();
            prop_assert_eq!(scorer.label_for(rank), scorer.label_for(rank));
        }
    }
}
