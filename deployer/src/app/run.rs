//! Runs one deployment until it finishes or the operator interrupts it

use std::future::Future;

use tracing::{info, warn};

use crate::app::options::RunOptions;
use crate::deploy::{OrchestrationEngine, RunSummary};
use crate::errors::DeployError;
use crate::utils::version_info;

/// Run a deployment with the system engine
pub async fn run(
    options: RunOptions,
    shutdown_signal: impl Future<Output = ()>,
) -> Result<RunSummary, DeployError> {
    let version = version_info();
    info!(
        version = %version.version,
        git_hash = %version.git_hash,
        built = %version.build_time,
        build_target = %version.target,
        "starting {} deployment from {}",
        options.mode,
        options.config_path.display()
    );
    if options.dry_run {
        info!("dry run: no local or remote state will be changed");
    }

    let engine = OrchestrationEngine::system(options.engine_options())?;
    run_with_engine(&engine, &options, shutdown_signal).await
}

/// Race the pipeline against the shutdown signal. An interrupted run keeps
/// whatever it already applied.
pub async fn run_with_engine(
    engine: &OrchestrationEngine,
    options: &RunOptions,
    shutdown_signal: impl Future<Output = ()>,
) -> Result<RunSummary, DeployError> {
    tokio::select! {
        result = engine.run(&options.config_path, options.mode) => result,
        _ = shutdown_signal => {
            warn!("interrupted, changes already applied are left in place");
            Err(DeployError::Interrupted)
        }
    }
}
