//! minio-deploy - Entry Point
//!
//! Deploys MinIO on one host or a cluster of hosts from a YAML file.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use minio_deploy::app::options::RunOptions;
use minio_deploy::app::run::run;
use minio_deploy::app::summary::print_summary;
use minio_deploy::config::DeploymentMode;
use minio_deploy::logs::{init_logging, LogLevel, LogOptions};

#[derive(Debug, Parser)]
#[command(name = "minio-deploy", version, about = "Deploy MinIO in standalone or cluster mode")]
struct Cli {
    /// Deployment topology
    #[arg(long, value_enum)]
    mode: DeploymentMode,

    /// Deployment file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log every change instead of applying it
    #[arg(long)]
    dry_run: bool,

    #[arg(
        long,
        default_value = "DEBUG",
        ignore_case = true,
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"]
    )]
    log_level: String,

    /// Directory of the rotating log file
    #[arg(long, env = "MINIO_DEPLOY_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// JSON console output
    #[arg(long)]
    json_logs: bool,

    /// Concurrent per-node workers, overrides the deployment file
    #[arg(long)]
    workers: Option<usize>,

    /// Key pair used for hosts without `ssh_key`
    #[arg(long)]
    ssh_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.log_level.parse::<LogLevel>() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: log_level.clone(),
        log_dir: Some(cli.log_dir.clone()),
        json_format: cli.json_logs,
        ..Default::default()
    };
    let guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = RunOptions {
        mode: cli.mode,
        config_path: cli.config,
        dry_run: cli.dry_run,
        log_level,
        workers: cli.workers,
        default_key: cli.ssh_key,
        ..Default::default()
    };

    info!("Running minio-deploy with options: {:?}", options);
    let result = run(options, await_shutdown_signal()).await;
    print_summary(&result);

    let code = match &result {
        Ok(_) => 0,
        Err(e) => {
            error!("Deployment failed: {e}");
            e.exit_code()
        }
    };

    // process::exit skips destructors, flush the log file first
    drop(guard);
    std::process::exit(code);
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Cannot install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, aborting...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, aborting...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, aborting...");
    }
}
