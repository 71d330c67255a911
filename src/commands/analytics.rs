use anyhow::{Context, Result};

use postqueue::analytics::BestTimeAnalyzer;
use postqueue::config::Config;

use super::AppContext;

/// Rebuild best-time recommendations for one tenant
pub fn refresh_best_times(config: Config, tenant: String) -> Result<()> {
    let offset = config.scheduling.local_offset()?;
    let ctx = AppContext::new(config, false)?;
    let analyzer = BestTimeAnalyzer::new(ctx.store.clone(), ctx.clock.clone(), offset);

    let report = analyzer
        .refresh_best_times(&tenant)
        .with_context(|| format!("Best-time refresh failed for tenant {tenant}"))?;
    println!(
        "Refreshed {} cells from {} published posts",
        report.cells_updated, report.posts_considered
    );

    let recommendations = analyzer.recommendations(&tenant, None)?;
    for rec in recommendations.iter().take(10) {
        println!(
            "  {:<10} {:?} {:02}:00  score {:>5.1}  (n={})",
            rec.platform, rec.weekday, rec.hour, rec.engagement_score, rec.sample_size
        );
    }
    Ok(())
}
