//! Prometheus metrics for dispatch and metrics sync
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails (or never happens, as in library use and tests),
//! every recording function is a no-op.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all queue metrics
struct QueueMetrics {
    publish_attempts: CounterVec,
    publish_duration: HistogramVec,
    reclaimed: Counter,
    metrics_sync: CounterVec,
    dispatch_pass_items: Gauge,
}

static QUEUE_METRICS: OnceLock<QueueMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Outcome label for a publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Published,
    Retried,
    Failed,
}

impl AttemptOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Retried => "retried",
            Self::Failed => "failed",
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics. Safe to call more than once.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = QueueMetrics {
        publish_attempts: register_counter_vec!(
            "postqueue_publish_attempts_total",
            "Publish attempts by platform and outcome",
            &["platform", "outcome"]
        )?,
        publish_duration: register_histogram_vec!(
            "postqueue_publish_duration_seconds",
            "Time spent in one platform publish call",
            &["platform"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]
        )?,
        reclaimed: register_counter!(
            "postqueue_queue_reclaimed_total",
            "Queue items reclaimed by the stuck-item watchdog"
        )?,
        metrics_sync: register_counter_vec!(
            "postqueue_metrics_sync_total",
            "Engagement metric refreshes by outcome",
            &["outcome"]
        )?,
        dispatch_pass_items: register_gauge!(
            "postqueue_dispatch_pass_items",
            "Due items picked up by the most recent dispatch pass"
        )?,
    };

    QUEUE_METRICS
        .set(metrics)
        .map_err(|_| "Queue metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    QUEUE_METRICS.get().is_some()
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Recording
// ============================================================================

pub fn record_publish_attempt(platform: &str, outcome: AttemptOutcome, duration_secs: f64) {
    let Some(m) = QUEUE_METRICS.get() else {
        return;
    };

    m.publish_attempts
        .with_label_values(&[platform, outcome.as_label()])
        .inc();
    m.publish_duration
        .with_label_values(&[platform])
        .observe(duration_secs);
}

pub fn record_reclaimed(count: usize) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.reclaimed.inc_by(count as f64);
    }
}

pub fn record_metrics_sync(synced: usize, failed: usize) {
    let Some(m) = QUEUE_METRICS.get() else {
        return;
    };

    if synced > 0 {
        m.metrics_sync
            .with_label_values(&["synced"])
            .inc_by(synced as f64);
    }
    if failed > 0 {
        m.metrics_sync
            .with_label_values(&["failed"])
            .inc_by(failed as f64);
    }
}

pub fn set_dispatch_pass_items(count: usize) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.dispatch_pass_items.set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_gather_after_recording() {
        let _ = init_metrics();
        record_publish_attempt("facebook", AttemptOutcome::Published, 0.2);
        record_reclaimed(1);
        record_metrics_sync(2, 1);
        set_dispatch_pass_items(3);

        let text = gather_metrics().unwrap();
        assert!(text.contains("postqueue_publish_attempts_total"));
        assert!(text.contains("postqueue_queue_reclaimed_total"));
    }
}
