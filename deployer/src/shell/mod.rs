//! Command execution against a deployment target.
//!
//! Every inspector and provisioner is written against [`HostShell`], so the
//! same code path drives the operator machine and remote nodes.

pub mod local;
pub mod remote;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DeployError;

pub use local::LocalShell;
pub use remote::RemoteShell;

/// Default timeout for a single command
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit status and captured streams of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Successful output carrying `stdout`
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// Normalized failure: exit 1, empty stdout, detail in stderr
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::new(1, "", detail)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// Best available description of a failure
    pub fn error_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit status {}", self.exit_code)
    }
}

/// A machine that commands can be run on
#[async_trait]
pub trait HostShell: Send + Sync {
    /// Display name of the target, used in logs and reports
    fn target(&self) -> &str;

    /// Whether commands run on the operator machine itself
    fn is_local(&self) -> bool;

    /// Run `command` through `sh -c`. Never fails: transport errors are
    /// folded into a [`CommandOutput::failure`].
    async fn exec_with_timeout(&self, command: &str, timeout: Duration) -> CommandOutput;

    async fn exec(&self, command: &str) -> CommandOutput {
        self.exec_with_timeout(command, DEFAULT_EXEC_TIMEOUT).await
    }

    /// Contents of a text file, `None` if it cannot be read
    async fn read_file(&self, path: &str) -> Option<String>;

    /// Create or replace a file with the given unix mode
    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), DeployError>;

    /// Append text to a file, creating it if needed
    async fn append_file(&self, path: &str, contents: &str) -> Result<(), DeployError>;
}
