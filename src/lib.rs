//! postqueue - Social media scheduling and publishing queue engine
//!
//! Decides when a post should go out on which platform, drives each
//! per-platform attempt through retries and partial failures, flags posts
//! that land too close together, and feeds historical engagement back into
//! "best time to post" recommendations.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and lifecycle enums
//! - [`clock`] - Injected time provider
//! - [`storage`] - Repository trait and SQLite implementation
//! - [`publisher`] - Platform publish/metrics capabilities and registry
//! - [`scheduler`] - Slots, conflicts, retry policy, dispatch and lifecycle
//! - [`analytics`] - Performance scoring and best-time recommendations
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use postqueue::clock::SystemClock;
//! use postqueue::config::Config;
//! use postqueue::publisher::{DryRunPublisher, PublisherRegistry};
//! use postqueue::scheduler::QueueDispatcher;
//! use postqueue::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);
//!     let registry = Arc::new(
//!         PublisherRegistry::new()
//!             .with_fallback_publisher(Arc::new(DryRunPublisher))
//!             .with_fallback_metrics(Arc::new(DryRunPublisher)),
//!     );
//!     let dispatcher = QueueDispatcher::new(
//!         store,
//!         registry.clone(),
//!         registry,
//!         Arc::new(SystemClock),
//!         &config.dispatcher,
//!     );
//!     let report = dispatcher.tick().await?;
//!     println!("{} published, {} failed", report.dispatch.succeeded, report.dispatch.failed);
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod publisher;
pub mod scheduler;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, ScheduleErrorTrait};
    pub use crate::models::{
        PlatformPost, PlatformPostStatus, PostStatus, QueueItem, QueueSettings, QueueStatus,
        ScheduledPost,
    };
    pub use crate::publisher::{MetricsProvider, PlatformPublisher, PublisherRegistry};
    pub use crate::scheduler::{QueueDispatcher, SchedulingCoordinator, SlotCalculator};
    pub use crate::storage::{SchedulingStore, SqliteStore};
}

// Direct re-exports for convenience
pub use models::{PlatformPost, PostStatus, QueueItem, ScheduledPost};
