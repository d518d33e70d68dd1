//! Shell on a remote node, one SSH session per call

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::shell::{CommandOutput, HostShell};
use crate::ssh::client::RemoteClient;
use crate::ssh::params::SshConnectionParams;
use crate::utils::sh_quote;

/// Forwards every call to a [`RemoteClient`] with fixed connection params
#[derive(Clone)]
pub struct RemoteShell {
    name: String,
    client: Arc<RemoteClient>,
    params: SshConnectionParams,
}

impl RemoteShell {
    pub fn new(name: impl Into<String>, client: Arc<RemoteClient>, params: SshConnectionParams) -> Self {
        Self {
            name: name.into(),
            client,
            params,
        }
    }

    pub fn params(&self) -> &SshConnectionParams {
        &self.params
    }
}

#[async_trait]
impl HostShell for RemoteShell {
    fn target(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn exec_with_timeout(&self, command: &str, timeout: Duration) -> CommandOutput {
        self.client
            .execute_with_timeout(&self.params, command, timeout)
            .await
    }

    async fn read_file(&self, path: &str) -> Option<String> {
        let output = self.client.download(&self.params, path).await;
        output.success().then_some(output.stdout)
    }

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), DeployError> {
        let output = self.client.upload(&self.params, contents, path, mode).await;
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::RemoteCommandFailure {
                host: self.name.clone(),
                detail: format!("upload {}: {}", path, output.error_detail()),
            })
        }
    }

    async fn append_file(&self, path: &str, contents: &str) -> Result<(), DeployError> {
        let command = format!("cat >> {}", sh_quote(path));
        let output = self
            .client
            .execute_with_input(&self.params, &command, contents.as_bytes())
            .await;
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::RemoteCommandFailure {
                host: self.name.clone(),
                detail: format!("append {}: {}", path, output.error_detail()),
            })
        }
    }
}
