//! Writes the service definition and drives systemd

use std::sync::Arc;

use tracing::{error, info};

use crate::errors::DeployError;
use crate::service::unit::GeneratedUnit;
use crate::service::{ENV_PATH, SERVICE_NAME, UNIT_PATH};
use crate::shell::HostShell;
use crate::utils::sh_quote;

/// Journal lines surfaced when the service fails to start
pub const JOURNAL_TAIL_LINES: usize = 50;

pub struct ServiceProvisioner {
    shell: Arc<dyn HostShell>,
}

impl ServiceProvisioner {
    pub fn new(shell: Arc<dyn HostShell>) -> Self {
        Self { shell }
    }

    fn service_error(&self, message: String) -> DeployError {
        DeployError::ServiceError(format!("{}: {}", self.shell.target(), message))
    }

    async fn systemctl(&self, args: &str) -> Result<(), DeployError> {
        let output = self.shell.exec(&format!("systemctl {}", args)).await;
        if output.success() {
            Ok(())
        } else {
            Err(self.service_error(format!("systemctl {} failed: {}", args, output.error_detail())))
        }
    }

    /// Unit file plus environment file. The environment file holds the root
    /// credentials in cleartext and is only readable by root.
    pub async fn write_artifacts(&self, generated: &GeneratedUnit) -> Result<(), DeployError> {
        self.shell
            .write_file(UNIT_PATH, generated.unit.as_bytes(), 0o644)
            .await?;
        self.shell
            .write_file(ENV_PATH, generated.environment.as_bytes(), 0o600)
            .await?;
        info!(host = %self.shell.target(), "wrote {} and {}", UNIT_PATH, ENV_PATH);
        Ok(())
    }

    /// State reported by `systemctl is-active`
    pub async fn active_state(&self) -> String {
        let output = self
            .shell
            .exec(&format!("systemctl is-active {}", SERVICE_NAME))
            .await;
        output.text().to_string()
    }

    /// Status and recent journal of the unit
    pub async fn recent_logs(&self) -> String {
        let status = self
            .shell
            .exec(&format!("systemctl status {} --no-pager -l", SERVICE_NAME))
            .await;
        let journal = self
            .shell
            .exec(&format!(
                "journalctl -u {} -n {} --no-pager",
                SERVICE_NAME, JOURNAL_TAIL_LINES
            ))
            .await;
        format!("{}\n{}", status.stdout.trim_end(), journal.stdout.trim_end())
    }

    /// Write artifacts, reload, enable, start and verify the service
    pub async fn configure(&self, data_dir: &str, generated: &GeneratedUnit) -> Result<(), DeployError> {
        let output = self.shell.exec(&format!("mkdir -p {}", sh_quote(data_dir))).await;
        if !output.success() {
            return Err(self.service_error(format!(
                "cannot create data directory {}: {}",
                data_dir,
                output.error_detail()
            )));
        }

        self.write_artifacts(generated).await?;
        self.systemctl("daemon-reload").await?;
        self.systemctl(&format!("enable {}", SERVICE_NAME)).await?;
        self.systemctl(&format!("start {}", SERVICE_NAME)).await?;

        let state = self.active_state().await;
        if state == "active" {
            info!(host = %self.shell.target(), "{} is active", SERVICE_NAME);
            return Ok(());
        }

        let logs = self.recent_logs().await;
        error!(host = %self.shell.target(), "{} is {:?} after start:\n{}", SERVICE_NAME, state, logs);
        Err(self.service_error(format!(
            "{} not active after start (state {:?})\n{}",
            SERVICE_NAME, state, logs
        )))
    }
}
