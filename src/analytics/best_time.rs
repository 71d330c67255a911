//! Best-time-to-post recommendations
//!
//! Recommendations are a rebuildable cache keyed by
//! (tenant, platform, weekday, hour). A refresh aggregates every published
//! record that has metrics into its local publish slot and overwrites the
//! cells it has data for. Cells without samples keep whatever they held.

use chrono::{Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::models::{weekday_from_sunday, BestTimeRecommendation, PlatformPost};
use crate::storage::{SchedulingStore, StorageResult};

/// Engagement score ceiling
const MAX_SCORE: f64 = 100.0;

/// Average engagement rate (percent) multiplier
const RATE_TO_SCORE: f64 = 10.0;

/// Cells written by one refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub posts_considered: usize,
    pub cells_updated: usize,
}

/// `min(avg_rate * 10, 100)`
pub fn engagement_score(avg_engagement_rate: f64) -> f64 {
    (avg_engagement_rate * RATE_TO_SCORE).clamp(0.0, MAX_SCORE)
}

type CellKey = (String, u32, u32);

/// Rebuilds [`BestTimeRecommendation`] rows from published history
pub struct BestTimeAnalyzer {
    store: Arc<dyn SchedulingStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl BestTimeAnalyzer {
    pub fn new(store: Arc<dyn SchedulingStore>, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self {
            store,
            clock,
            offset,
        }
    }

    pub fn refresh_best_times(&self, tenant_id: &str) -> StorageResult<RefreshReport> {
        let records = self.store.published_platform_posts(tenant_id, None)?;

        let mut cells: BTreeMap<CellKey, Vec<f64>> = BTreeMap::new();
        let mut posts_considered = 0;
        for record in &records {
            if let Some((key, rate)) = self.cell_sample(record) {
                posts_considered += 1;
                cells.entry(key).or_default().push(rate);
            }
        }

        let now = self.clock.now();
        let mut cells_updated = 0;
        for ((platform, weekday, hour), rates) in cells {
            let Some(weekday) = weekday_from_sunday(weekday) else {
                continue;
            };
            let sample_size = rates.len() as u32;
            let avg_engagement_rate = rates.iter().mean();

            self.store.upsert_best_time(&BestTimeRecommendation {
                tenant_id: tenant_id.to_string(),
                platform,
                weekday,
                hour,
                engagement_score: engagement_score(avg_engagement_rate),
                sample_size,
                avg_engagement_rate,
                calculated_at: now,
            })?;
            cells_updated += 1;
        }

        tracing::info!(
            tenant_id,
            posts_considered,
            cells_updated,
            "Best-time recommendations refreshed"
        );
        Ok(RefreshReport {
            posts_considered,
            cells_updated,
        })
    }

    /// Recommendations for a tenant, highest score first
    pub fn recommendations(
        &self,
        tenant_id: &str,
        platform: Option<&str>,
    ) -> StorageResult<Vec<BestTimeRecommendation>> {
        self.store.best_times(tenant_id, platform)
    }

    fn cell_sample(&self, record: &PlatformPost) -> Option<(CellKey, f64)> {
        let metrics = record.metrics?;
        let local = record.published_at?.with_timezone(&self.offset);
        let key = (
            record.platform.clone(),
            local.weekday().num_days_from_sunday(),
            local.hour(),
        );
        Some((key, metrics.engagement_rate()))
    }
}
