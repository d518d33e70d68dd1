//! Error types for the deployment pipeline

use thiserror::Error;

/// Transport-level SSH failures.
///
/// Only [`SshError::Auth`] makes a key-authenticated call eligible for the
/// password retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SshError {
    #[error("SSH authentication error: {0}")]
    Auth(String),

    #[error("SSH protocol error: {0}")]
    Protocol(String),

    #[error("SSH timeout: {0}")]
    Timeout(String),
}

impl SshError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SshError::Auth(_))
    }
}

/// Main error type for a deployment run
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Prerequisite error: {0}")]
    PrerequisiteError(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    #[error("Existing installation detected on: {}", .0.join(", "))]
    IdempotencyGuardTripped(Vec<String>),

    #[error("Remote command failed on {host}: {detail}")]
    RemoteCommandFailure { host: String, detail: String },

    #[error("No installable binary found: {0}")]
    InstallResolutionExhausted(String),

    #[error("Health check exhausted: {0}")]
    HealthCheckExhausted(String),

    #[error("Disk error: {0}")]
    DiskError(String),

    #[error("Firewall error: {0}")]
    FirewallError(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Trust error: {0}")]
    TrustError(String),

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Process exit code for this failure. Every failure class maps to 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<tokio::task::JoinError> for DeployError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeployError::Internal(format!("task failed to complete: {}", err))
    }
}
