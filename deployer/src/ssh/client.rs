//! Remote execution client.
//!
//! Applies the connection-selection policy on top of an [`SshTransport`].
//! Every call opens its own session; nothing is pooled.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::errors::SshError;
use crate::shell::{CommandOutput, DEFAULT_EXEC_TIMEOUT};
use crate::ssh::params::SshConnectionParams;
use crate::ssh::transport::{AuthMethod, RusshTransport, SshTransport};
use crate::utils::sh_quote;

/// Default worker budget for [`RemoteClient::execute_many`]
pub const DEFAULT_WORKERS: usize = 5;

/// One unit of work for [`RemoteClient::execute_many`]
#[derive(Debug, Clone)]
pub struct RemoteTask {
    pub params: SshConnectionParams,
    pub command: String,
    pub timeout: Duration,
}

impl RemoteTask {
    pub fn new(params: SshConnectionParams, command: impl Into<String>) -> Self {
        Self {
            params,
            command: command.into(),
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

/// Primary authentication method plus the one allowed fallback.
///
/// A fallback exists only when both a key and a password are configured.
pub fn auth_plan(params: &SshConnectionParams) -> (AuthMethod, Option<AuthMethod>) {
    match (&params.key_path, &params.password) {
        (Some(key), Some(password)) => (
            AuthMethod::Key(key.clone()),
            Some(AuthMethod::Password(password.clone())),
        ),
        (Some(key), None) => (AuthMethod::Key(key.clone()), None),
        (None, Some(password)) => (AuthMethod::Password(password.clone()), None),
        (None, None) => (AuthMethod::Discover, None),
    }
}

/// `sh` command that stores stdin at `path` with `mode`
pub fn render_upload_command(path: &str, mode: u32) -> String {
    let parent = Path::new(path)
        .parent()
        .and_then(|p| p.to_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    let path = sh_quote(path);
    format!(
        "umask 077; mkdir -p -- {} && cat > {} && chmod {:o} {}",
        sh_quote(parent),
        path,
        mode,
        path
    )
}

pub struct RemoteClient {
    transport: Arc<dyn SshTransport>,
}

impl RemoteClient {
    pub fn new(transport: Arc<dyn SshTransport>) -> Self {
        Self { transport }
    }

    /// Client over the real SSH transport
    pub fn russh() -> Self {
        Self::new(Arc::new(RusshTransport::default()))
    }

    /// Run one command with an explicit authentication method
    pub async fn run_with(
        &self,
        params: &SshConnectionParams,
        auth: &AuthMethod,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, SshError> {
        self.transport
            .exec(params, auth, command, stdin, timeout)
            .await
    }

    /// Run one command following the connection-selection policy.
    ///
    /// Key authentication is retried with the password only when it failed
    /// with an authentication error. Protocol errors and timeouts surface
    /// directly.
    pub async fn run(
        &self,
        params: &SshConnectionParams,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, SshError> {
        let (primary, fallback) = auth_plan(params);
        match self.run_with(params, &primary, command, stdin, timeout).await {
            Err(err) if err.is_auth() => match fallback {
                Some(fallback) => {
                    warn!(host = %params.host, "key authentication failed ({}), retrying with password", err);
                    self.run_with(params, &fallback, command, stdin, timeout).await
                }
                None => Err(err),
            },
            other => other,
        }
    }

    /// Run a command with the default timeout. Never fails.
    pub async fn execute(&self, params: &SshConnectionParams, command: &str) -> CommandOutput {
        self.execute_with_timeout(params, command, DEFAULT_EXEC_TIMEOUT)
            .await
    }

    pub async fn execute_with_timeout(
        &self,
        params: &SshConnectionParams,
        command: &str,
        timeout: Duration,
    ) -> CommandOutput {
        normalize(params, self.run(params, command, None, timeout).await)
    }

    pub async fn execute_with_input(
        &self,
        params: &SshConnectionParams,
        command: &str,
        input: &[u8],
    ) -> CommandOutput {
        normalize(
            params,
            self.run(params, command, Some(input), DEFAULT_EXEC_TIMEOUT).await,
        )
    }

    /// Place `contents` at `remote_path` with `mode`
    pub async fn upload(
        &self,
        params: &SshConnectionParams,
        contents: &[u8],
        remote_path: &str,
        mode: u32,
    ) -> CommandOutput {
        let command = render_upload_command(remote_path, mode);
        // Binaries can be large, so allow more time than a plain command.
        let timeout = DEFAULT_EXEC_TIMEOUT * 10;
        normalize(params, self.run(params, &command, Some(contents), timeout).await)
    }

    /// Fetch the text contents of `remote_path`
    pub async fn download(&self, params: &SshConnectionParams, remote_path: &str) -> CommandOutput {
        let command = format!("cat -- {}", sh_quote(remote_path));
        self.execute(params, &command).await
    }

    /// Whether a session can be opened and a trivial command run
    pub async fn check_connection(&self, params: &SshConnectionParams) -> bool {
        let output = self.execute(params, "true").await;
        if !output.success() {
            warn!(host = %params.host, "connection check failed: {}", output.error_detail());
        }
        output.success()
    }

    /// Run every task with at most `workers` sessions in flight.
    ///
    /// Returns exactly one output per task, in input order. A failing task
    /// never stops the others.
    pub async fn execute_many(
        self: Arc<Self>,
        tasks: Vec<RemoteTask>,
        workers: usize,
    ) -> Vec<CommandOutput> {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let sem = Arc::clone(&semaphore);
            let client = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await;
                client
                    .execute_with_timeout(&task.params, &task.command, task.timeout)
                    .await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in futures::future::join_all(handles).await {
            results.push(match handle {
                Ok(output) => output,
                Err(e) => CommandOutput::failure(format!("task aborted: {}", e)),
            });
        }
        results
    }
}

fn normalize(params: &SshConnectionParams, result: Result<CommandOutput, SshError>) -> CommandOutput {
    match result {
        Ok(output) => output,
        Err(err) => {
            debug!(host = %params.host, "remote call failed: {}", err);
            CommandOutput::failure(err.to_string())
        }
    }
}
