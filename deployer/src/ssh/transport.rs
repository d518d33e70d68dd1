//! SSH transport seam and its russh implementation.
//!
//! A transport opens one session per call, authenticates with exactly the
//! method it is given, runs one command and tears the session down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use tracing::debug;

use crate::errors::SshError;
use crate::shell::CommandOutput;
use crate::ssh::params::SshConnectionParams;
use crate::utils::home_dir;

/// Connect timeout, independent of the command timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Private keys tried when no credential is configured
const DEFAULT_IDENTITIES: &[&str] = &["id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

/// How a single session authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Public key from this private key file only
    Key(PathBuf),
    /// Password only
    Password(String),
    /// The user's default identity files
    Discover,
}

impl AuthMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Key(_) => "publickey",
            AuthMethod::Password(_) => "password",
            AuthMethod::Discover => "default-keys",
        }
    }
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Key(path) => write!(f, "Key({})", path.display()),
            AuthMethod::Password(_) => write!(f, "Password(***)"),
            AuthMethod::Discover => write!(f, "Discover"),
        }
    }
}

#[async_trait]
pub trait SshTransport: Send + Sync {
    /// Run `command` on `params.host`, feeding `stdin` if given.
    async fn exec(
        &self,
        params: &SshConnectionParams,
        auth: &AuthMethod,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, SshError>;
}

/// Accepts every server key. Host keys are not pinned or checked against
/// `known_hosts`.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// [`SshTransport`] backed by russh
#[derive(Debug, Clone)]
pub struct RusshTransport {
    connect_timeout: Duration,
}

impl RusshTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(
        &self,
        params: &SshConnectionParams,
    ) -> Result<Handle<AcceptingHandler>, SshError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(120)),
            ..Default::default()
        });
        let addr = (params.host.as_str(), params.port);

        match tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, addr, AcceptingHandler),
        )
        .await
        {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(e)) => Err(SshError::Protocol(format!(
                "connect {}: {}",
                params.address(),
                e
            ))),
            Err(_) => Err(SshError::Timeout(format!(
                "connect {} after {:?}",
                params.address(),
                self.connect_timeout
            ))),
        }
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<AcceptingHandler>,
        params: &SshConnectionParams,
        auth: &AuthMethod,
    ) -> Result<(), SshError> {
        let accepted = match auth {
            AuthMethod::Key(path) => {
                let pair = russh_keys::load_secret_key(path, None).map_err(|e| {
                    SshError::Protocol(format!("load key {}: {}", path.display(), e))
                })?;
                handle
                    .authenticate_publickey(params.username.as_str(), Arc::new(pair))
                    .await
                    .map_err(auth_error)?
            }
            AuthMethod::Password(password) => handle
                .authenticate_password(params.username.as_str(), password.as_str())
                .await
                .map_err(auth_error)?,
            AuthMethod::Discover => {
                let mut accepted = false;
                for path in default_identity_files() {
                    if !path.exists() {
                        continue;
                    }
                    let Ok(pair) = russh_keys::load_secret_key(&path, None) else {
                        debug!("skipping unreadable identity {}", path.display());
                        continue;
                    };
                    if handle
                        .authenticate_publickey(params.username.as_str(), Arc::new(pair))
                        .await
                        .map_err(auth_error)?
                    {
                        accepted = true;
                        break;
                    }
                }
                accepted
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(SshError::Auth(format!(
                "{} rejected {} authentication",
                params.address(),
                auth.kind()
            )))
        }
    }

    async fn run_channel(
        handle: &Handle<AcceptingHandler>,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, SshError> {
        let mut channel = handle.channel_open_session().await.map_err(protocol_error)?;
        channel.exec(true, command).await.map_err(protocol_error)?;
        if let Some(input) = stdin {
            channel.data(input).await.map_err(protocol_error)?;
        }
        channel.eof().await.map_err(protocol_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                _ => {}
            }
        }

        let exit_code = exit_code
            .ok_or_else(|| SshError::Protocol("channel closed without exit status".into()))?;

        Ok(CommandOutput::new(
            exit_code,
            String::from_utf8_lossy(&stdout),
            String::from_utf8_lossy(&stderr),
        ))
    }
}

impl Default for RusshTransport {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl SshTransport for RusshTransport {
    async fn exec(
        &self,
        params: &SshConnectionParams,
        auth: &AuthMethod,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, SshError> {
        let mut handle = self.connect(params).await?;
        self.authenticate(&mut handle, params, auth).await?;

        debug!(host = %params.host, "ssh exec: {}", command);
        let result = match tokio::time::timeout(timeout, Self::run_channel(&handle, command, stdin)).await {
            Ok(result) => result,
            Err(_) => Err(SshError::Timeout(format!(
                "command on {} exceeded {:?}",
                params.host, timeout
            ))),
        };

        let _ = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
        result
    }
}

fn auth_error(err: russh::Error) -> SshError {
    match err {
        russh::Error::NoAuthMethod => SshError::Auth(err.to_string()),
        other => SshError::Protocol(other.to_string()),
    }
}

fn protocol_error(err: russh::Error) -> SshError {
    SshError::Protocol(err.to_string())
}

fn default_identity_files() -> Vec<PathBuf> {
    let ssh_dir = home_dir().join(".ssh");
    DEFAULT_IDENTITIES.iter().map(|name| ssh_dir.join(name)).collect()
}
