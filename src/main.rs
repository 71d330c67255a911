use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use postqueue::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "postqueue",
    version,
    about = "Scheduling and publishing queue engine for multi-platform social posts",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults and POSTQUEUE_* variables otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one watchdog sweep and one dispatch pass
    Tick {
        /// Publish through the dry-run publisher
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Run the periodic dispatch trigger until Ctrl-C
    Run {
        /// Publish through the dry-run publisher
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Show the next open posting slot for an account
    NextSlot {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        account: String,
    },

    /// Rebuild best-time-to-post recommendations
    RefreshBestTimes {
        #[arg(long)]
        tenant: String,
    },

    /// Refresh engagement metrics of published posts
    SyncMetrics {
        #[arg(long)]
        tenant: String,

        /// Fetch through the dry-run metrics provider
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Print dashboard statistics as JSON
    Stats {
        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = postqueue::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics registration failed; continuing without metrics");
    }

    tracing::info!("postqueue starting");

    match cli.command {
        Commands::Tick { dry_run } => {
            tracing::info!(dry_run, "Starting tick command");
            commands::tick(config, dry_run).await?;
        }

        Commands::Run { dry_run } => {
            tracing::info!(dry_run, "Starting run command");
            commands::run(config, dry_run).await?;
        }

        Commands::NextSlot { tenant, account } => {
            tracing::info!(tenant = %tenant, account = %account, "Starting next-slot command");
            commands::next_slot(config, tenant, account)?;
        }

        Commands::RefreshBestTimes { tenant } => {
            tracing::info!(tenant = %tenant, "Starting refresh-best-times command");
            commands::refresh_best_times(config, tenant)?;
        }

        Commands::SyncMetrics { tenant, dry_run } => {
            tracing::info!(tenant = %tenant, dry_run, "Starting sync-metrics command");
            commands::sync_metrics(config, tenant, dry_run).await?;
        }

        Commands::Stats { tenant } => {
            commands::stats(config, tenant)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("postqueue=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("postqueue={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
