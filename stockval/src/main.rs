//! Stockval - stock valuation service.
//!
//! Serves the valuation API with scheduled refreshes, or runs a single
//! refresh from the command line.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use stockval::orchestrator::{wait_for_terminal, Scope, StatusKey, UpdateStatus};
use stockval::{ServiceState, StockvalService};
use stockval_common::config::{Config, RefreshMode};
use stockval_common::logging::init_logging;

/// Gordon growth valuation with scheduled market data refresh.
#[derive(Parser, Debug)]
#[command(name = "stockval")]
#[command(version)]
#[command(about = "Stock valuation service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API with the refresh scheduler (default)
    Serve,
    /// Refresh one segment or all segments, then exit
    Refresh {
        /// Segment (a_share, h_share, us_share) or "all"
        #[arg(default_value = "all")]
        scope: String,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,

        /// Include records with auto-update turned off
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load_and_validate()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Stockval v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let service = StockvalService::new(config)?;

            // Log startup timing before entering main service loop
            let startup_duration = startup_start.elapsed();
            tracing::info!(
                duration_ms = startup_duration.as_millis() as u64,
                "Service initialized in {:?}",
                startup_duration
            );

            service.start().await
        }
        Commands::Refresh {
            scope,
            timeout_secs,
            full,
        } => {
            let mode = if full {
                RefreshMode::Full
            } else {
                RefreshMode::Watchlist
            };
            refresh_once(config, &scope, mode, Duration::from_secs(timeout_secs)).await
        }
    }
}

/// Trigger a run, follow it to completion and print the final statuses.
async fn refresh_once(
    config: Config,
    scope: &str,
    mode: RefreshMode,
    timeout: Duration,
) -> Result<()> {
    let scope: Scope = scope.parse()?;
    let state = ServiceState::open(config)?;
    let orchestrator = &state.orchestrator;

    let handle = orchestrator.trigger_with_mode(scope, mode).await?;
    tracing::info!(scope = %scope, mode = %mode, run_id = %handle.run_id, "Refresh started");

    let key = match scope {
        Scope::All => StatusKey::Overall,
        Scope::Segment(segment) => StatusKey::Segment(segment),
    };
    let last = wait_for_terminal(
        orchestrator.status_store(),
        key,
        Duration::from_millis(500),
        timeout,
    )
    .await?;

    println!("{:<10} {:<8} {:>8}  {}", "KEY", "STATUS", "PROGRESS", "MESSAGE");
    for (key, status) in orchestrator.get_status().await {
        println!(
            "{:<10} {:<8} {:>7}%  {}",
            key.as_str(),
            status.status.to_string(),
            status.progress,
            status.message
        );
    }

    if last.status == UpdateStatus::Failed {
        bail!("refresh of {} failed: {}", scope, last.message);
    }
    Ok(())
}
