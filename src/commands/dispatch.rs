use anyhow::{Context, Result};
use std::sync::Arc;

use postqueue::analytics::BestTimeAnalyzer;
use postqueue::config::Config;
use postqueue::scheduler::{DispatchTrigger, TriggerEvent};

use super::AppContext;

/// One watchdog sweep plus one pass over due items
pub async fn tick(config: Config, dry_run: bool) -> Result<()> {
    let ctx = AppContext::new(config, dry_run)?;
    let report = ctx
        .dispatcher()
        .tick()
        .await
        .context("Dispatch pass failed")?;

    println!("Dispatch Pass");
    println!("=============");
    println!("  Reclaimed:  {}", report.reclaimed);
    println!("  Succeeded:  {}", report.dispatch.succeeded);
    println!(
        "  Failed:     {} ({} requeued)",
        report.dispatch.failed, report.dispatch.retried
    );
    println!("  Skipped:    {}", report.dispatch.skipped);
    Ok(())
}

/// Run the dispatch trigger until Ctrl-C
pub async fn run(config: Config, dry_run: bool) -> Result<()> {
    let offset = config.scheduling.local_offset()?;
    let ctx = AppContext::new(config, dry_run)?;

    let analyzer = Arc::new(BestTimeAnalyzer::new(
        ctx.store.clone(),
        ctx.clock.clone(),
        offset,
    ));
    let trigger = Arc::new(
        DispatchTrigger::new(
            ctx.config.trigger.clone(),
            Arc::new(ctx.dispatcher()),
            ctx.store.clone(),
            ctx.clock.clone(),
        )
        .with_best_times(analyzer),
    );

    let mut events = trigger.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TriggerEvent::Dispatched { tick, report, .. } => {
                    if report.reclaimed + report.dispatch.succeeded + report.dispatch.failed > 0 {
                        tracing::info!(
                            tick,
                            reclaimed = report.reclaimed,
                            succeeded = report.dispatch.succeeded,
                            failed = report.dispatch.failed,
                            "Tick completed"
                        );
                    }
                }
                TriggerEvent::MetricsSynced { tenant_id, report } => {
                    tracing::info!(%tenant_id, synced = report.synced, failed = report.failed, "Metrics synced");
                }
                TriggerEvent::BestTimesRefreshed { tenant_id, report } => {
                    tracing::info!(%tenant_id, cells = report.cells_updated, "Best times refreshed");
                }
                TriggerEvent::TickFailed { tick, error } => {
                    tracing::warn!(tick, %error, "Tick failed");
                }
            }
        }
    });

    let runner = {
        let trigger = trigger.clone();
        tokio::spawn(async move { trigger.start().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    trigger.stop().await;
    runner
        .await
        .context("Trigger task panicked")?
        .context("Trigger loop failed")?;
    event_logger.abort();

    println!("Stopped after {} ticks", trigger.ticks());
    Ok(())
}

/// Refresh engagement metrics for one tenant's published posts
pub async fn sync_metrics(config: Config, tenant: String, dry_run: bool) -> Result<()> {
    let ctx = AppContext::new(config, dry_run)?;
    let report = ctx
        .dispatcher()
        .bulk_sync_metrics(&tenant)
        .await
        .with_context(|| format!("Metrics sync failed for tenant {tenant}"))?;

    println!("Metrics sync for {tenant}: {} synced, {} failed", report.synced, report.failed);
    Ok(())
}
