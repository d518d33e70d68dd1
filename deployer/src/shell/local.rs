//! Shell on the operator machine

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::shell::{CommandOutput, HostShell};

/// Runs commands with the local `sh`
#[derive(Debug, Clone)]
pub struct LocalShell {
    name: String,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::named("localhost")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostShell for LocalShell {
    fn target(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn exec_with_timeout(&self, command: &str, timeout: Duration) -> CommandOutput {
        debug!(host = %self.name, "exec: {}", command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => CommandOutput::new(
                output.status.code().unwrap_or(1),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ),
            Ok(Err(e)) => CommandOutput::failure(format!("failed to spawn sh: {}", e)),
            Err(_) => CommandOutput::failure(format!("command timed out after {:?}", timeout)),
        }
    }

    async fn read_file(&self, path: &str) -> Option<String> {
        File::new(path).read_string().await.ok()
    }

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), DeployError> {
        File::new(path).write_bytes(contents, mode).await
    }

    async fn append_file(&self, path: &str, contents: &str) -> Result<(), DeployError> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        File::new(path).append_string(contents).await
    }
}
