//! Options of one deployment run

use std::path::PathBuf;

use crate::config::DeploymentMode;
use crate::deploy::EngineOptions;
use crate::health::RetryPolicy;
use crate::logs::LogLevel;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: DeploymentMode,

    /// Deployment file
    pub config_path: PathBuf,

    /// Log what would change without changing it
    pub dry_run: bool,

    pub log_level: LogLevel,

    /// Fan-out budget, overrides the deployment file
    pub workers: Option<usize>,

    /// Retries of the server port and liveness probes
    pub health_policy: RetryPolicy,

    /// Key pair for hosts that configure none
    pub default_key: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Standalone,
            config_path: PathBuf::from("config.yaml"),
            dry_run: false,
            log_level: LogLevel::Debug,
            workers: None,
            health_policy: RetryPolicy::default(),
            default_key: None,
        }
    }
}

impl RunOptions {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            dry_run: self.dry_run,
            health_policy: self.health_policy,
            default_key: self.default_key.clone(),
            workers: self.workers,
        }
    }
}
