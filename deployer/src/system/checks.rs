//! Pre-flight checks on the operator machine

use std::sync::Arc;

use sysinfo::System;
use tracing::{error, info};

use crate::errors::DeployError;
use crate::shell::HostShell;

/// Tools the pipeline shells out to on the operator machine
pub const REQUIRED_COMMANDS: &[&str] = &["ssh-keygen", "file"];

pub struct SystemCheck {
    shell: Arc<dyn HostShell>,
    required: Vec<String>,
}

impl SystemCheck {
    pub fn new(shell: Arc<dyn HostShell>) -> Self {
        Self {
            shell,
            required: REQUIRED_COMMANDS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub async fn check_os(&self) -> Result<(), DeployError> {
        let output = self.shell.exec("uname -s").await;
        let kernel = output.text();
        if !output.success() || kernel != "Linux" {
            return Err(DeployError::PrerequisiteError(format!(
                "unsupported operating system: {}",
                if kernel.is_empty() { "unknown" } else { kernel }
            )));
        }
        info!(
            os = %System::long_os_version().unwrap_or_else(|| "Linux".to_string()),
            hostname = %System::host_name().unwrap_or_default(),
            "operating system supported"
        );
        Ok(())
    }

    pub async fn check_root(&self) -> Result<(), DeployError> {
        let output = self.shell.exec("id -u").await;
        if output.success() && output.text() == "0" {
            info!("running with root privileges");
            Ok(())
        } else {
            Err(DeployError::PrerequisiteError(
                "root privileges are required".to_string(),
            ))
        }
    }

    pub async fn check_commands(&self) -> Result<(), DeployError> {
        let mut missing = Vec::new();
        for command in &self.required {
            let output = self
                .shell
                .exec(&format!("command -v {} >/dev/null 2>&1", command))
                .await;
            if !output.success() {
                error!("required command not found: {}", command);
                missing.push(command.clone());
            }
        }
        if missing.is_empty() {
            info!("all required commands present");
            Ok(())
        } else {
            Err(DeployError::PrerequisiteError(format!(
                "missing commands: {}",
                missing.join(", ")
            )))
        }
    }

    /// Run every check, stopping at the first failure
    pub async fn run_all(&self) -> Result<(), DeployError> {
        self.check_os().await?;
        self.check_root().await?;
        self.check_commands().await
    }
}
