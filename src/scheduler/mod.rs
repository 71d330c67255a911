//! Post scheduling and queue dispatch
//!
//! This module turns authored posts into per-platform queue items and drives
//! those items through publishing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    SchedulingCoordinator                     │
//! │   create / update / reschedule / cancel / approve / bulk     │
//! └──────┬──────────────────────┬──────────────────────┬─────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//! ┌──────────────┐      ┌──────────────┐      ┌────────────────┐
//! │SlotCalculator│      │  Conflict    │      │ SchedulingStore│
//! │ (next slot,  │      │  Detector    │      │ (posts, queue, │
//! │  best hour)  │      │              │      │  settings)     │
//! └──────────────┘      └──────────────┘      └───────┬────────┘
//!                                                     │
//!        ┌────────────────────────────────────────────┘
//!        ▼
//! ┌──────────────┐  tick  ┌────────────────┐      ┌──────────────────┐
//! │DispatchTrigger├──────►│QueueDispatcher ├─────►│PlatformPublisher │
//! │ (interval)   │        │ watchdog, due  │      │ (per platform)   │
//! └──────────────┘        │ items, retry   │      └──────────────────┘
//!                         └────────────────┘
//! ```
//!
//! # Components
//!
//! - [`SlotCalculator`]: next free posting slot and time suggestions
//! - [`ConflictDetector`]: posts landing too close to each other
//! - [`SchedulingCoordinator`]: post lifecycle operations
//! - [`QueueDispatcher`]: one bounded pass over due queue items
//! - [`RetryPolicy`]: retry budget and failure classification
//! - [`DispatchTrigger`]: runs dispatch passes on an interval
//!
//! # Usage
//!
//! ```ignore
//! use postqueue::scheduler::{NewPost, SchedulingCoordinator};
//!
//! let coordinator = SchedulingCoordinator::new(store, clock, &config)?;
//! let saved = coordinator.create_post(NewPost {
//!     tenant_id: "t1".into(),
//!     account_id: "acc1".into(),
//!     content: "Launch day".into(),
//!     platforms: vec!["facebook".into(), "linkedin".into()],
//!     scheduled_at: Some(at),
//!     ..Default::default()
//! })?;
//!
//! // Later, from the trigger loop or a one-shot CLI call
//! let report = dispatcher.tick().await?;
//! println!("published {} / failed {}", report.dispatch.succeeded, report.dispatch.failed);
//! ```
//!
//! # Retry Settings
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `max_attempts` | 3 | Attempts per platform, counted at claim time |
//! | `retry_delay_secs` | 300 | Base delay before the next attempt |
//! | `backoff_multiplier` | 1.0 | Delay growth per attempt (1.0 = fixed) |
//! | `classification` | `retry_all` | `transient_only` gives up on permanent errors |

pub mod conflicts;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod retry;
pub mod slots;
pub mod trigger;

// Re-export main types
pub use conflicts::{
    plan_resolution, ConflictDetector, ConflictGroup, ConflictMap, ConflictingPost, PlannedMove,
    ResolutionStrategy,
};
pub use coordinator::{
    BulkRescheduleReport, BulkStrategy, CalendarDay, CalendarEntry, DashboardStatistics, NewPost,
    PostDetail, PostUpdate, QueueStatistics, SavedPost, SchedulingCoordinator, SettingsUpdate,
    SkippedPost,
};
pub use dispatcher::{
    failed_platforms_message, DispatchReport, PlatformOutcome, QueueDispatcher, SyncReport,
    TickReport,
};
pub use error::{SchedulerError, SchedulerResult};
pub use retry::{FailureClassifier, RetryClassification, RetryDecision, RetryPolicy};
pub use slots::{
    default_posting_times, default_settings, SlotCalculator, SuggestionSource, TimeSuggestion,
    GENERIC_PLATFORM,
};
pub use trigger::{DispatchTrigger, TriggerEvent};
