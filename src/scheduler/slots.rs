//! Next-slot resolution from account queue settings
//!
//! All slot arithmetic happens in the configured local offset: posting
//! times and enabled weekdays describe the account owner's wall clock, not
//! UTC. Results are converted back to UTC for storage.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{SchedulerError, SchedulerResult};
use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::models::{QueueSettings, DEFAULT_POSTS_PER_DAY};
use crate::storage::SchedulingStore;

/// Platform used for defaults when the caller does not name one
pub const GENERIC_PLATFORM: &str = "other";

/// Engagement-friendly default posting times per platform
pub fn default_posting_times(platform: &str) -> Vec<NaiveTime> {
    let hours: &[u32] = match platform {
        "facebook" => &[9, 13, 18],
        "instagram" => &[9, 12, 19],
        "twitter" | "x" => &[8, 12, 17, 21],
        "linkedin" => &[8, 12, 17],
        "tiktok" => &[7, 12, 19],
        _ => &[9, 12, 18],
    };
    hours
        .iter()
        .filter_map(|h| NaiveTime::from_hms_opt(*h, 0, 0))
        .collect()
}

/// Settings handed out for an account that never saved any. Disabled until
/// the owner opts in.
pub fn default_settings(tenant_id: &str, account_id: &str, platform: &str) -> QueueSettings {
    QueueSettings {
        tenant_id: tenant_id.to_string(),
        account_id: account_id.to_string(),
        platform: platform.to_string(),
        enabled: false,
        posting_times: default_posting_times(platform),
        days_enabled: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
        posts_per_day: DEFAULT_POSTS_PER_DAY,
    }
}

/// Earliest configured slot strictly after `now`.
///
/// Today's remaining times are checked first (if today is enabled), then the
/// first posting time of each following day up to `horizon_days` ahead.
/// Does not look at `enabled`; callers gate on that.
pub fn resolve_next_slot(
    settings: &QueueSettings,
    now: DateTime<FixedOffset>,
    horizon_days: u32,
) -> Option<DateTime<FixedOffset>> {
    let mut times = settings.posting_times.clone();
    times.sort();
    let first = *times.first()?;
    let offset = *now.offset();
    let today = now.date_naive();

    if settings.is_day_enabled(today.weekday()) {
        if let Some(time) = times.iter().find(|t| **t > now.time()) {
            return local_instant(offset, today, *time);
        }
    }

    (1..=i64::from(horizon_days))
        .filter_map(|d| today.checked_add_signed(Duration::days(d)))
        .find(|date| settings.is_day_enabled(date.weekday()))
        .and_then(|date| local_instant(offset, date, first))
}

/// Configured times still ahead of `now` today
pub fn remaining_slots_today(settings: &QueueSettings, now: DateTime<FixedOffset>) -> u32 {
    if !settings.enabled || !settings.is_day_enabled(now.date_naive().weekday()) {
        return 0;
    }
    settings
        .posting_times
        .iter()
        .filter(|t| **t > now.time())
        .count() as u32
}

fn local_instant(
    offset: FixedOffset,
    date: NaiveDate,
    time: NaiveTime,
) -> Option<DateTime<FixedOffset>> {
    offset.from_local_datetime(&date.and_time(time)).single()
}

/// Where a suggested time came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SuggestionSource {
    /// Highest-scoring best-time cell for the weekday
    Recommendation {
        engagement_score: f64,
        sample_size: u32,
    },
    /// No recommendation for the weekday
    Fallback,
}

/// Suggested posting time plus the platform's default times that day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSuggestion {
    pub suggested_at: DateTime<Utc>,
    pub source: SuggestionSource,
    pub alternatives: Vec<DateTime<Utc>>,
}

// ============================================================================
// SlotCalculator
// ============================================================================

/// Resolves posting slots for accounts
pub struct SlotCalculator {
    store: Arc<dyn SchedulingStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    horizon_days: u32,
    fallback_hour: u32,
}

impl SlotCalculator {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        clock: Arc<dyn Clock>,
        config: &SchedulingConfig,
    ) -> SchedulerResult<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            SchedulerError::invalid_schedule(format!(
                "utc offset of {} minutes is out of range",
                config.utc_offset_minutes
            ))
        })?;

        Ok(Self {
            store,
            clock,
            offset,
            horizon_days: config.search_horizon_days.max(1),
            fallback_hour: config.fallback_hour.min(23),
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current instant on the local posting clock
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.offset)
    }

    /// Stored settings, or platform defaults when the account has none.
    /// Defaults are not persisted.
    pub fn settings_for(
        &self,
        tenant_id: &str,
        account_id: &str,
        platform: &str,
    ) -> SchedulerResult<QueueSettings> {
        Ok(self
            .store
            .get_queue_settings(tenant_id, account_id)?
            .unwrap_or_else(|| default_settings(tenant_id, account_id, platform)))
    }

    /// Next open slot for the account
    pub fn next_slot(&self, tenant_id: &str, account_id: &str) -> SchedulerResult<DateTime<Utc>> {
        let settings = self.settings_for(tenant_id, account_id, GENERIC_PLATFORM)?;
        self.next_slot_for(&settings)
    }

    /// Next open slot for already-loaded settings
    pub fn next_slot_for(&self, settings: &QueueSettings) -> SchedulerResult<DateTime<Utc>> {
        if !settings.enabled {
            return Err(SchedulerError::not_configured(&settings.account_id));
        }
        if settings.posting_times.is_empty() {
            return Err(SchedulerError::no_slots(&settings.account_id));
        }

        let slot = resolve_next_slot(settings, self.local_now(), self.horizon_days)
            .ok_or_else(|| SchedulerError::no_slots(&settings.account_id))?;

        tracing::debug!(
            account_id = %settings.account_id,
            slot = %slot,
            "Resolved next posting slot"
        );
        Ok(slot.with_timezone(&Utc))
    }

    /// Remaining configured times today for the account
    pub fn slots_available_today(&self, settings: &QueueSettings) -> u32 {
        remaining_slots_today(settings, self.local_now())
    }

    /// Hour of the highest-scoring recommendation for a weekday, if any
    pub fn best_hour(
        &self,
        tenant_id: &str,
        platform: &str,
        weekday: Weekday,
    ) -> SchedulerResult<Option<u32>> {
        Ok(self
            .best_cell(tenant_id, platform, weekday)?
            .map(|(hour, _, _)| hour))
    }

    fn best_cell(
        &self,
        tenant_id: &str,
        platform: &str,
        weekday: Weekday,
    ) -> SchedulerResult<Option<(u32, f64, u32)>> {
        let best = self
            .store
            .best_times(tenant_id, Some(platform))?
            .into_iter()
            .filter(|r| r.weekday == weekday)
            .max_by(|a, b| a.engagement_score.total_cmp(&b.engagement_score))
            .map(|r| (r.hour, r.engagement_score, r.sample_size));
        Ok(best)
    }

    /// Suggest a posting time for `platform` on `preferred_date` (default:
    /// tomorrow, local). Uses the best recommendation for that weekday, else
    /// the configured fallback hour.
    pub fn suggest_time(
        &self,
        tenant_id: &str,
        platform: &str,
        preferred_date: Option<NaiveDate>,
    ) -> SchedulerResult<TimeSuggestion> {
        let today = self.local_now().date_naive();
        let date = preferred_date
            .or_else(|| today.succ_opt())
            .unwrap_or(today);

        let (hour, source) = match self.best_cell(tenant_id, platform, date.weekday())? {
            Some((hour, engagement_score, sample_size)) => (
                hour,
                SuggestionSource::Recommendation {
                    engagement_score,
                    sample_size,
                },
            ),
            None => (self.fallback_hour, SuggestionSource::Fallback),
        };

        let at_hour = |h: u32| {
            NaiveTime::from_hms_opt(h, 0, 0)
                .and_then(|t| local_instant(self.offset, date, t))
                .map(|dt| dt.with_timezone(&Utc))
        };

        let suggested_at = at_hour(hour).ok_or_else(|| {
            SchedulerError::invalid_schedule(format!("cannot build {date} {hour:02}:00"))
        })?;

        let alternatives = default_posting_times(platform)
            .into_iter()
            .filter_map(|t| local_instant(self.offset, date, t))
            .map(|dt| dt.with_timezone(&Utc))
            .filter(|dt| *dt != suggested_at)
            .collect();

        Ok(TimeSuggestion {
            suggested_at,
            source,
            alternatives,
        })
    }
}
