//! Periodic dispatch trigger
//!
//! The core has no event loop of its own: each tick is one bounded pass
//! (watchdog, then due items). This module drives those passes on a fixed
//! interval for long-running deployments and piggybacks the slower
//! maintenance jobs (metrics sync, best-time refresh) on the tick counter.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::dispatcher::{QueueDispatcher, SyncReport, TickReport};
use super::error::SchedulerResult;
use crate::analytics::{BestTimeAnalyzer, RefreshReport};
use crate::clock::Clock;
use crate::config::TriggerConfig;
use crate::storage::SchedulingStore;

// ============================================================================
// Trigger Events
// ============================================================================

/// Events emitted by the trigger loop
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    /// A dispatch tick finished
    Dispatched {
        tick: u64,
        report: TickReport,
        triggered_at: DateTime<Utc>,
    },

    /// Engagement metrics were refreshed for a tenant
    MetricsSynced { tenant_id: String, report: SyncReport },

    /// Best-time recommendations were rebuilt for a tenant
    BestTimesRefreshed {
        tenant_id: String,
        report: RefreshReport,
    },

    /// A tick failed; the loop keeps going
    TickFailed { tick: u64, error: String },
}

// ============================================================================
// Dispatch Trigger
// ============================================================================

/// Runs [`QueueDispatcher::tick`] on an interval until stopped
pub struct DispatchTrigger {
    config: TriggerConfig,
    dispatcher: Arc<QueueDispatcher>,
    best_times: Option<Arc<BestTimeAnalyzer>>,
    store: Arc<dyn SchedulingStore>,
    clock: Arc<dyn Clock>,
    event_sender: broadcast::Sender<TriggerEvent>,
    is_running: Arc<RwLock<bool>>,
    ticks: AtomicU64,
}

impl DispatchTrigger {
    pub fn new(
        config: TriggerConfig,
        dispatcher: Arc<QueueDispatcher>,
        store: Arc<dyn SchedulingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(100);

        Self {
            config,
            dispatcher,
            best_times: None,
            store,
            clock,
            event_sender,
            is_running: Arc::new(RwLock::new(false)),
            ticks: AtomicU64::new(0),
        }
    }

    /// Rebuild best-time recommendations on the configured cadence
    pub fn with_best_times(mut self, analyzer: Arc<BestTimeAnalyzer>) -> Self {
        self.best_times = Some(analyzer);
        self
    }

    /// Subscribe to trigger events
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.event_sender.subscribe()
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Start the trigger loop (runs until stopped)
    pub async fn start(&self) -> SchedulerResult<()> {
        *self.is_running.write().await = true;
        tracing::info!(
            interval_secs = self.config.tick_interval_secs,
            "Dispatch trigger started"
        );

        if self.config.run_on_startup {
            self.run_tick().await;
        }

        while *self.is_running.read().await {
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval()) => {
                    self.run_tick().await;
                }
                _ = self.wait_for_stop() => {
                    break;
                }
            }
        }

        tracing::info!(ticks = self.ticks(), "Dispatch trigger stopped");
        Ok(())
    }

    /// Stop the trigger loop
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    /// Check if trigger is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    // Internal: Wait for stop signal
    async fn wait_for_stop(&self) {
        loop {
            if !*self.is_running.read().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Run one tick now. Failures are logged and broadcast, never returned.
    pub async fn run_tick(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        match self.dispatcher.tick().await {
            Ok(report) => {
                let _ = self.event_sender.send(TriggerEvent::Dispatched {
                    tick,
                    report,
                    triggered_at: self.clock.now(),
                });
            }
            Err(e) => {
                tracing::error!(tick, error = %e, "Dispatch tick failed");
                let _ = self.event_sender.send(TriggerEvent::TickFailed {
                    tick,
                    error: e.to_string(),
                });
            }
        }

        if is_due(tick, self.config.metrics_sync_every_ticks) {
            self.sync_metrics().await;
        }
        if is_due(tick, self.config.best_time_refresh_every_ticks) {
            self.refresh_best_times();
        }
    }

    async fn sync_metrics(&self) {
        let tenants = match self.store.tenants() {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list tenants for metrics sync");
                return;
            }
        };

        for tenant_id in tenants {
            match self.dispatcher.bulk_sync_metrics(&tenant_id).await {
                Ok(report) => {
                    let _ = self
                        .event_sender
                        .send(TriggerEvent::MetricsSynced { tenant_id, report });
                }
                Err(e) => tracing::error!(tenant_id = %tenant_id, error = %e, "Metrics sync failed"),
            }
        }
    }

    fn refresh_best_times(&self) {
        let Some(analyzer) = &self.best_times else {
            return;
        };
        let tenants = match self.store.tenants() {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list tenants for best-time refresh");
                return;
            }
        };

        for tenant_id in tenants {
            match analyzer.refresh_best_times(&tenant_id) {
                Ok(report) => {
                    let _ = self
                        .event_sender
                        .send(TriggerEvent::BestTimesRefreshed { tenant_id, report });
                }
                Err(e) => {
                    tracing::error!(tenant_id = %tenant_id, error = %e, "Best-time refresh failed");
                }
            }
        }
    }
}

fn is_due(tick: u64, every: u64) -> bool {
    every > 0 && tick % every == 0
}

// ============================================================================
// Tests
// ============================================================================
