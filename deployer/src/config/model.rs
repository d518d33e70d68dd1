//! Typed deployment description, immutable once loaded

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ssh::params::{SshConnectionParams, DEFAULT_SSH_PORT, DEFAULT_SSH_USER};

/// Deployment topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Standalone,
    Cluster,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Standalone => write!(f, "standalone"),
            DeploymentMode::Cluster => write!(f, "cluster"),
        }
    }
}

/// Root principal of the service. Written to the environment file in
/// cleartext.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub root_user: String,

    #[serde(default)]
    pub root_password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("root_user", &self.root_user)
            .field("root_password", &"***")
            .finish()
    }
}

/// Block device dedicated to the data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub device: String,

    #[serde(default)]
    pub mount_point: String,

    #[serde(default = "default_filesystem")]
    pub filesystem: String,

    /// Destructive; only honored when explicitly set
    #[serde(default)]
    pub format_disk: bool,
}

fn default_filesystem() -> String {
    "ext4".to_string()
}

/// Anonymous access policy applied to a provisioned bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketPolicy {
    Public,
    #[default]
    Private,
}

impl BucketPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketPolicy::Public => "public",
            BucketPolicy::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,

    #[serde(default)]
    pub policy: BucketPolicy,

    /// Hard quota such as `10GiB`
    #[serde(default)]
    pub quota: Option<String>,
}

/// The `minio` block: binaries, ports and post-install provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_console_port")]
    pub console_port: u16,

    /// Standard storage class parity, e.g. `EC:2`
    #[serde(default)]
    pub erasure_coding: Option<String>,

    #[serde(default)]
    pub buckets: Vec<BucketSpec>,

    /// Server download URL, `{arch}` is replaced by `amd64` or `arm64`
    #[serde(default = "default_server_url")]
    pub download_url: String,

    /// Client tool download URL, same placeholder rules
    #[serde(default = "default_client_url")]
    pub mc_download_url: String,

    /// Operator-side directory searched when downloads fail
    #[serde(default = "default_package_dir")]
    pub local_package_dir: PathBuf,

    #[serde(default = "default_install_dir")]
    pub install_dir: String,

    #[serde(default = "default_min_free_gb")]
    pub min_free_gb: u64,

    /// Run the install, service and health stages
    #[serde(default = "default_true")]
    pub provision_service: bool,

    /// Concurrency budget of per-node fan-out
    #[serde(default = "default_workers")]
    pub fanout_workers: usize,

    /// Probe the liveness endpoint over https
    #[serde(default)]
    pub secure: bool,
}

fn default_server_port() -> u16 {
    9000
}

fn default_console_port() -> u16 {
    9001
}

fn default_server_url() -> String {
    "https://dl.min.io/server/minio/release/linux-{arch}/minio".to_string()
}

fn default_client_url() -> String {
    "https://dl.min.io/client/mc/release/linux-{arch}/mc".to_string()
}

fn default_package_dir() -> PathBuf {
    PathBuf::from("packages")
}

fn default_install_dir() -> String {
    "/usr/local/bin".to_string()
}

fn default_min_free_gb() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    5
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            console_port: default_console_port(),
            erasure_coding: None,
            buckets: Vec::new(),
            download_url: default_server_url(),
            mc_download_url: default_client_url(),
            local_package_dir: default_package_dir(),
            install_dir: default_install_dir(),
            min_free_gb: default_min_free_gb(),
            provision_service: true,
            fanout_workers: default_workers(),
            secure: false,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Target of a standalone deployment
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneHost {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_user")]
    pub ssh_user: String,

    #[serde(default = "default_port")]
    pub ssh_port: u16,

    #[serde(default)]
    pub ssh_key: Option<PathBuf>,

    #[serde(default)]
    pub ssh_password: Option<String>,

    #[serde(default)]
    pub data_dir: String,

    #[serde(default)]
    pub disk: Option<DiskSpec>,
}

impl fmt::Debug for StandaloneHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandaloneHost")
            .field("host", &self.host)
            .field("ssh_user", &self.ssh_user)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_key", &self.ssh_key)
            .field("ssh_password", &self.ssh_password.as_ref().map(|_| "***"))
            .field("data_dir", &self.data_dir)
            .field("disk", &self.disk)
            .finish()
    }
}

impl StandaloneHost {
    pub fn ssh_params(&self) -> SshConnectionParams {
        SshConnectionParams {
            host: self.host.clone(),
            port: self.ssh_port,
            username: self.ssh_user.clone(),
            key_path: self.ssh_key.clone(),
            password: self.ssh_password.clone(),
        }
    }
}

/// One member of a cluster
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Logical name
    #[serde(default)]
    pub host: String,

    /// Address used for SSH and for the service endpoints
    #[serde(default)]
    pub ip: String,

    #[serde(default = "default_user")]
    pub ssh_user: String,

    #[serde(default = "default_port")]
    pub ssh_port: u16,

    #[serde(default)]
    pub ssh_key: Option<PathBuf>,

    #[serde(default)]
    pub ssh_password: Option<String>,

    #[serde(default)]
    pub data_dir: String,

    #[serde(default)]
    pub disk: Option<DiskSpec>,
}

impl fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("host", &self.host)
            .field("ip", &self.ip)
            .field("ssh_user", &self.ssh_user)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_key", &self.ssh_key)
            .field("ssh_password", &self.ssh_password.as_ref().map(|_| "***"))
            .field("data_dir", &self.data_dir)
            .field("disk", &self.disk)
            .finish()
    }
}

impl NodeDescriptor {
    /// Address to connect to: the IP, or the host name if no IP is set
    pub fn address(&self) -> &str {
        if self.ip.is_empty() {
            &self.host
        } else {
            &self.ip
        }
    }

    pub fn ssh_params(&self) -> SshConnectionParams {
        SshConnectionParams {
            host: self.address().to_string(),
            port: self.ssh_port,
            username: self.ssh_user.clone(),
            key_path: self.ssh_key.clone(),
            password: self.ssh_password.clone(),
        }
    }
}

/// The `cluster` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,

    /// Overrides `minio.server_port`
    #[serde(default)]
    pub server_port: Option<u16>,

    /// Overrides `minio.console_port`
    #[serde(default)]
    pub console_port: Option<u16>,

    /// Overrides `minio.erasure_coding`
    #[serde(default)]
    pub erasure_coding: Option<String>,
}

/// Everything one run needs to know
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(rename = "deployment_mode", default)]
    pub mode: Option<DeploymentMode>,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub minio: ServiceSettings,

    #[serde(default)]
    pub standalone: Option<StandaloneHost>,

    #[serde(default)]
    pub cluster: Option<ClusterSettings>,
}

impl DeploymentSpec {
    pub fn mode(&self) -> DeploymentMode {
        self.mode.unwrap_or_default()
    }

    pub fn server_port(&self) -> u16 {
        self.cluster
            .as_ref()
            .and_then(|c| c.server_port)
            .unwrap_or(self.minio.server_port)
    }

    pub fn console_port(&self) -> u16 {
        self.cluster
            .as_ref()
            .and_then(|c| c.console_port)
            .unwrap_or(self.minio.console_port)
    }

    pub fn erasure_coding(&self) -> Option<&str> {
        self.cluster
            .as_ref()
            .and_then(|c| c.erasure_coding.as_deref())
            .or(self.minio.erasure_coding.as_deref())
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        self.cluster.as_ref().map(|c| c.nodes.as_slice()).unwrap_or(&[])
    }
}
