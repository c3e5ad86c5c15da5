//! mysql2docker
//!
//! Dumps a MySQL database, gzips it, bakes it into a minimal container image
//! and pushes that image to a registry, which then serves as an immutable
//! backup store.

// mysql2docker/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backup::{BackupOrchestrator, RunReport, SystemClock};
use config::BackupJobConfig;
use errors::BackupError;
use utils::command::ProcessRunner;
use utils::connection::{ConnectionProbe, MySqlProbe};
use utils::find_executable;

#[derive(Debug, Parser)]
#[command(name = "mysql2docker", version, about = "Back up a MySQL database into a container image")]
struct Cli {
    /// Read environment variables from this file instead of `./.env`
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Verify tools and database connectivity, then exit without backing up
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run_app(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mysql2docker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_app(cli: Cli) -> Result<bool> {
    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("Failed to load environment file {}", path.display()))?;
        }
        None => {
            // A missing ./.env is fine; the variables may come from the real environment.
            let _ = dotenv::dotenv();
        }
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(stage = "idle", kind = e.kind(), "Configuration rejected: {}", e);
            println!("{}", RunReport::rejected(&e).to_json_line());
            return Ok(false);
        }
    };

    if cli.check {
        return check_connectivity(&config).await;
    }

    let runner = ProcessRunner;
    let probe = MySqlProbe;
    let clock = SystemClock;
    let orchestrator = BackupOrchestrator::new(&config, &runner, &probe, &clock);

    let report = orchestrator.run_until(shutdown_signal()).await;
    println!("{}", report.to_json_line());
    Ok(report.succeeded())
}

/// Reads the environment once and resolves both external tools on PATH.
fn load_config() -> Result<BackupJobConfig, BackupError> {
    let mut config = BackupJobConfig::from_env()?;
    config.tools.dump = find_executable(&config.tools.dump)?;
    config.tools.container = find_executable(&config.tools.container)?;
    info!(
        "Using {} and {}",
        config.tools.dump.display(),
        config.tools.container.display()
    );
    Ok(config)
}

async fn check_connectivity(config: &BackupJobConfig) -> Result<bool> {
    match MySqlProbe.probe(&config.database, config.probe_timeout).await {
        Ok(()) => {
            info!("✅ Connectivity check passed");
            Ok(true)
        }
        Err(e) => {
            let e = BackupError::from(e);
            error!(stage = %e.stage(), kind = e.kind(), "Connectivity check failed: {}", e);
            Ok(false)
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler the run simply cannot be interrupted.
        std::future::pending::<()>().await;
    }
    info!("Received interrupt");
}
