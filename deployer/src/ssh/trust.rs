//! Passwordless key trust between the operator and a target host

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::shell::{HostShell, DEFAULT_EXEC_TIMEOUT};
use crate::ssh::client::RemoteClient;
use crate::ssh::params::SshConnectionParams;
use crate::ssh::transport::AuthMethod;
use crate::utils::{home_dir, sh_quote};

const READ_AUTHORIZED_KEYS: &str = "cat ~/.ssh/authorized_keys 2>/dev/null || echo ''";
const PREPARE_SSH_DIR: &str = "mkdir -p ~/.ssh && chmod 700 ~/.ssh";

/// Key material of an OpenSSH public key line, i.e. the second field.
/// The trailing comment is ignored.
pub fn key_material(public_key: &str) -> Option<&str> {
    let mut fields = public_key.split_whitespace();
    let _kind = fields.next()?;
    fields.next()
}

/// Whether an `authorized_keys` listing already holds `material`. Any field
/// of a line may carry it, so option prefixes like `from="..."` are allowed.
pub fn authorized_keys_contain(listing: &str, material: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().any(|field| field == material))
}

pub struct TrustBootstrapper {
    client: Arc<RemoteClient>,
    local: Arc<dyn HostShell>,
    default_key: PathBuf,
}

impl TrustBootstrapper {
    pub fn new(client: Arc<RemoteClient>, local: Arc<dyn HostShell>) -> Self {
        Self {
            client,
            local,
            default_key: home_dir().join(".ssh").join("id_rsa"),
        }
    }

    /// Override the key pair used when a host configures none
    pub fn with_default_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_key = path.into();
        self
    }

    /// Private key path for `params`. A configured `.pub` path is mapped to
    /// its private half.
    pub fn private_key_path(&self, params: &SshConnectionParams) -> PathBuf {
        let path = params.key_path.as_deref().unwrap_or(&self.default_key);
        match path.to_str().and_then(|p| p.strip_suffix(".pub")) {
            Some(private) => PathBuf::from(private),
            None => path.to_path_buf(),
        }
    }

    fn public_key_path(private: &Path) -> String {
        format!("{}.pub", private.display())
    }

    async fn read_public_key(&self, private: &Path) -> Option<String> {
        let contents = self.local.read_file(&Self::public_key_path(private)).await?;
        let line = contents.lines().find(|l| !l.trim().is_empty())?;
        Some(line.trim().to_string())
    }

    /// Whether passwordless trust already exists with the host.
    ///
    /// True if a key session succeeds, or if a password session shows the
    /// local public key in the remote `authorized_keys`.
    pub async fn check_trust(&self, params: &SshConnectionParams) -> bool {
        let private = self.private_key_path(params);

        match self
            .client
            .run_with(params, &AuthMethod::Key(private.clone()), "true", None, DEFAULT_EXEC_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => {
                info!(host = %params.host, "key trust already established");
                return true;
            }
            Ok(output) => debug!(host = %params.host, "key session ran but failed: {}", output.error_detail()),
            Err(e) => debug!(host = %params.host, "key session failed: {}", e),
        }

        let Some(password) = params.password.as_deref() else {
            return false;
        };
        let Some(public_key) = self.read_public_key(&private).await else {
            return false;
        };
        match self.remote_has_key(params, password, &public_key).await {
            Ok(true) => {
                info!(host = %params.host, "public key already authorized");
                true
            }
            Ok(false) => {
                info!(host = %params.host, "password login works but key is not authorized");
                false
            }
            Err(e) => {
                warn!(host = %params.host, "unable to inspect authorized keys: {}", e);
                false
            }
        }
    }

    async fn remote_has_key(
        &self,
        params: &SshConnectionParams,
        password: &str,
        public_key: &str,
    ) -> Result<bool, DeployError> {
        let material = key_material(public_key)
            .ok_or_else(|| DeployError::TrustError("malformed local public key".into()))?;
        let output = self
            .client
            .run_with(
                params,
                &AuthMethod::Password(password.to_string()),
                READ_AUTHORIZED_KEYS,
                None,
                DEFAULT_EXEC_TIMEOUT,
            )
            .await?;
        Ok(output.success() && authorized_keys_contain(&output.stdout, material))
    }

    async fn ensure_local_key_pair(&self, private: &Path) -> Result<String, DeployError> {
        if let Some(key) = self.read_public_key(private).await {
            return Ok(key);
        }

        info!("generating key pair at {}", private.display());
        let private_str = private.display().to_string();
        let parent = private
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let command = format!(
            "mkdir -p {} && chmod 700 {} && ssh-keygen -t rsa -b 2048 -f {} -N '' -q",
            sh_quote(&parent),
            sh_quote(&parent),
            sh_quote(&private_str)
        );
        let output = self.local.exec(&command).await;
        if !output.success() {
            return Err(DeployError::TrustError(format!(
                "ssh-keygen failed: {}",
                output.error_detail()
            )));
        }

        self.read_public_key(private).await.ok_or_else(|| {
            DeployError::TrustError(format!("public key missing after generating {}", private_str))
        })
    }

    /// Install the local public key on the host.
    ///
    /// Requires a password. Re-checks the remote `authorized_keys` first and
    /// changes nothing if the key is already present.
    pub async fn establish_trust(&self, params: &SshConnectionParams) -> Result<bool, DeployError> {
        let password = params.password.as_deref().ok_or_else(|| {
            DeployError::TrustError(format!(
                "{} has no key trust and no password to establish it",
                params.host
            ))
        })?;

        let private = self.private_key_path(params);
        let public_key = self.ensure_local_key_pair(&private).await?;

        if self.remote_has_key(params, password, &public_key).await? {
            info!(host = %params.host, "public key already present, nothing to do");
            return Ok(true);
        }

        let auth = AuthMethod::Password(password.to_string());
        let output = self
            .client
            .run_with(params, &auth, PREPARE_SSH_DIR, None, DEFAULT_EXEC_TIMEOUT)
            .await?;
        if !output.success() {
            warn!(host = %params.host, "cannot prepare ~/.ssh: {}", output.error_detail());
            return Ok(false);
        }

        let append = format!(
            "printf '%s\\n' {} >> ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
            sh_quote(&public_key)
        );
        let output = self
            .client
            .run_with(params, &auth, &append, None, DEFAULT_EXEC_TIMEOUT)
            .await?;
        if !output.success() {
            warn!(host = %params.host, "cannot authorize key: {}", output.error_detail());
            return Ok(false);
        }

        info!(host = %params.host, "key trust established");
        Ok(true)
    }
}
