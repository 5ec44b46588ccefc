//! marketplace-sync - Catalog synchronization for a two-account marketplace seller
//!
//! This is the command line entry point. Scheduling is left to the caller
//! (cron, systemd timers or a job runner); each invocation does one thing.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};

use marketplace_sync::config::Config;
use marketplace_sync::database::SqliteDatabase;
use marketplace_sync::logging::init_tracing;
use marketplace_sync::models::{AccountSelector, SyncMode, SyncRunStatus, SyncType};
use marketplace_sync::sync::SyncService;

/// marketplace-sync - Catalog synchronization for a two-account marketplace seller
#[derive(Parser, Debug)]
#[command(name = "marketplace-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "MARKETPLACE_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize one or both accounts
    Sync {
        /// primary, fulfillment or both
        #[arg(short, long)]
        account: AccountSelector,

        /// catalog, offers or orders
        #[arg(short = 't', long = "type", default_value = "catalog")]
        sync_type: SyncType,

        /// full or incremental
        #[arg(short, long, default_value = "full")]
        mode: SyncMode,
    },
    /// Fail runs stuck in the running state
    Cleanup {
        /// Age in minutes after which a running run counts as stuck
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        timeout_minutes: Option<u32>,
    },
    /// Print the latest sync runs as JSON
    Runs {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting marketplace-sync"
    );

    // Initialize database
    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let service = SyncService::new(&config, database)?;

    match args.command {
        Command::Sync {
            account,
            sync_type,
            mode,
        } => {
            let runs = tokio::select! {
                runs = service.trigger_sync(account, sync_type, mode) => runs?,
                _ = shutdown_signal() => {
                    warn!("Sync interrupted, unfinished runs are left for cleanup");
                    return Ok(ExitCode::FAILURE);
                }
            };

            let mut exit = ExitCode::SUCCESS;
            for run in &runs {
                println!("{}", serde_json::to_string(run)?);
                if matches!(run.status, SyncRunStatus::Failed | SyncRunStatus::Timeout) {
                    error!(
                        run_id = run.id.unwrap_or_default(),
                        account = %run.account,
                        status = %run.status,
                        "Sync run did not complete"
                    );
                    exit = ExitCode::FAILURE;
                }
            }
            Ok(exit)
        }
        Command::Cleanup { timeout_minutes } => {
            let minutes = timeout_minutes.unwrap_or(config.sync.stuck_timeout_minutes);
            let count = service.cleanup_stuck_runs(minutes).await?;
            info!(count = count, timeout_minutes = minutes, "Cleanup finished");
            println!("{}", count);
            Ok(ExitCode::SUCCESS)
        }
        Command::Runs { limit } => {
            let runs = service.recent_runs(limit).await?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
