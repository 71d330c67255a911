pub mod analytics;
pub mod dispatch;
pub mod schedule;

// Re-export command functions for convenience
pub use analytics::refresh_best_times;
pub use dispatch::{run, sync_metrics, tick};
pub use schedule::{next_slot, stats};

use anyhow::{Context, Result};
use std::sync::Arc;

use postqueue::clock::{Clock, SystemClock};
use postqueue::config::Config;
use postqueue::publisher::{DryRunPublisher, PublisherRegistry};
use postqueue::scheduler::QueueDispatcher;
use postqueue::storage::{SchedulingStore, SqliteStore};

/// Shared wiring for every subcommand
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn SchedulingStore>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<PublisherRegistry>,
}

impl AppContext {
    /// Open the configured database. With `dry_run` every platform is served
    /// by [`DryRunPublisher`]; otherwise the registry is empty and dispatch
    /// records "no publisher registered" failures.
    pub fn new(config: Config, dry_run: bool) -> Result<Self> {
        let store = SqliteStore::new(&config.database.sqlite_path).with_context(|| {
            format!(
                "Failed to open database: {}",
                config.database.sqlite_path.display()
            )
        })?;

        let mut registry = PublisherRegistry::new();
        if dry_run {
            registry = registry
                .with_fallback_publisher(Arc::new(DryRunPublisher))
                .with_fallback_metrics(Arc::new(DryRunPublisher));
        } else {
            tracing::warn!("No platform publishers are registered; use --dry-run to simulate");
        }

        Ok(Self {
            config,
            store: Arc::new(store),
            clock: Arc::new(SystemClock),
            registry: Arc::new(registry),
        })
    }

    pub fn dispatcher(&self) -> QueueDispatcher {
        QueueDispatcher::new(
            self.store.clone(),
            self.registry.clone(),
            self.registry.clone(),
            self.clock.clone(),
            &self.config.dispatcher,
        )
    }
}
