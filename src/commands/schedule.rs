use anyhow::{Context, Result};

use postqueue::config::Config;
use postqueue::scheduler::{SchedulerError, SchedulingCoordinator, SlotCalculator};

use super::AppContext;

/// Print the next open posting slot for an account
pub fn next_slot(config: Config, tenant: String, account: String) -> Result<()> {
    let ctx = AppContext::new(config, false)?;
    let slots = SlotCalculator::new(ctx.store.clone(), ctx.clock.clone(), &ctx.config.scheduling)?;

    match slots.next_slot(&tenant, &account) {
        Ok(at) => {
            let local = at.with_timezone(&slots.offset());
            println!("Next slot for {account}: {}", local.format("%a %Y-%m-%d %H:%M %:z"));
            Ok(())
        }
        Err(e @ (SchedulerError::NotConfigured { .. } | SchedulerError::NoSlotsDefined { .. })) => {
            println!("{e}");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to compute next slot"),
    }
}

/// Dashboard statistics as JSON
pub fn stats(config: Config, tenant: String) -> Result<()> {
    let ctx = AppContext::new(config, false)?;
    let coordinator = SchedulingCoordinator::new(ctx.store.clone(), ctx.clock.clone(), &ctx.config)?;

    let statistics = coordinator
        .statistics(&tenant)
        .with_context(|| format!("Failed to load statistics for tenant {tenant}"))?;
    println!("{}", serde_json::to_string_pretty(&statistics)?);
    Ok(())
}
