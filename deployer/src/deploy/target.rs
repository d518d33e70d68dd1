//! Per-host deployment targets resolved from the deployment file

use crate::config::{DeploymentMode, DeploymentSpec, DiskSpec, NodeDescriptor, StandaloneHost};
use crate::disk::DiskRequest;
use crate::errors::DeployError;
use crate::ssh::SshConnectionParams;
use crate::utils::is_local_host;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    /// Name used in logs and reports
    pub name: String,
    /// Address used for SSH and for probing the service
    pub address: String,
    pub params: SshConnectionParams,
    /// Data directory, the mount point when a disk is attached
    pub data_dir: String,
    pub disk: Option<DiskSpec>,
    pub local: bool,
}

fn resolve_data_dir(data_dir: &str, disk: Option<&DiskSpec>) -> String {
    match disk {
        Some(disk) if disk.enabled && !disk.mount_point.is_empty() => disk.mount_point.clone(),
        _ => data_dir.to_string(),
    }
}

impl DeployTarget {
    pub fn from_standalone(host: &StandaloneHost) -> Self {
        Self {
            name: host.host.clone(),
            address: host.host.clone(),
            params: host.ssh_params(),
            data_dir: resolve_data_dir(&host.data_dir, host.disk.as_ref()),
            disk: host.disk.clone(),
            local: is_local_host(&host.host),
        }
    }

    pub fn from_node(node: &NodeDescriptor) -> Self {
        let address = node.address().to_string();
        let name = if node.host.is_empty() {
            address.clone()
        } else {
            node.host.clone()
        };
        Self {
            name,
            local: is_local_host(&address),
            params: node.ssh_params(),
            data_dir: resolve_data_dir(&node.data_dir, node.disk.as_ref()),
            disk: node.disk.clone(),
            address,
        }
    }

    /// Every target of the run, in file order
    pub fn resolve(spec: &DeploymentSpec) -> Result<Vec<DeployTarget>, DeployError> {
        match spec.mode() {
            DeploymentMode::Standalone => {
                let host = spec.standalone.as_ref().ok_or_else(|| {
                    DeployError::ConfigError("standalone deployment without a standalone block".to_string())
                })?;
                Ok(vec![Self::from_standalone(host)])
            }
            DeploymentMode::Cluster => {
                let nodes = spec.nodes();
                if nodes.is_empty() {
                    return Err(DeployError::Internal(
                        "cluster deployment without node descriptors".to_string(),
                    ));
                }
                Ok(nodes.iter().map(Self::from_node).collect())
            }
        }
    }

    /// Enabled disk with a device to prepare
    pub fn enabled_disk(&self) -> Option<&DiskSpec> {
        self.disk
            .as_ref()
            .filter(|d| d.enabled && !d.device.is_empty())
    }

    pub fn disk_request(&self, min_free_gb: u64) -> Option<DiskRequest> {
        self.enabled_disk().map(|disk| DiskRequest {
            device: disk.device.clone(),
            mount_point: self.data_dir.clone(),
            filesystem: disk.filesystem.clone(),
            format: disk.format_disk,
            min_free_gb,
        })
    }
}
