//! Engagement analytics over published posts
//!
//! - [`performance`]: composite score, percentile rank and label per post
//! - [`best_time`]: per-slot engagement aggregates consulted by slot suggestions

pub mod best_time;
pub mod performance;

pub use best_time::{engagement_score, BestTimeAnalyzer, RefreshReport};
pub use performance::{
    hypothesis, percentile_rank, PerformanceLabel, PerformanceScorer, ScoreResult, DEFAULT_GROUP,
};
