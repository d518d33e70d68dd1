//! Loading and validating the deployment file

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::config::model::{DeploymentMode, DeploymentSpec, DiskSpec};
use crate::errors::DeployError;
use crate::filesys::file::File;

/// Read, parse and validate the deployment file. `mode` takes precedence
/// over `deployment_mode` in the file.
pub async fn load_spec(
    path: &Path,
    mode: Option<DeploymentMode>,
) -> Result<DeploymentSpec, DeployError> {
    info!("loading deployment config from {}", path.display());

    let file = File::new(path);
    if !file.exists().await {
        return Err(DeployError::ConfigError(format!(
            "config file {} does not exist",
            path.display()
        )));
    }
    let contents = file.read_string().await?;
    let spec = parse_spec(&contents, mode)?;

    info!(mode = %spec.mode(), "config validated");
    Ok(spec)
}

/// Parse YAML text and validate the result
pub fn parse_spec(contents: &str, mode: Option<DeploymentMode>) -> Result<DeploymentSpec, DeployError> {
    let mut spec: DeploymentSpec = serde_yaml::from_str(contents)
        .map_err(|e| DeployError::ConfigError(format!("cannot parse config: {}", e)))?;
    if let Some(mode) = mode {
        spec.mode = Some(mode);
    }
    validate(&spec)?;
    Ok(spec)
}

fn require(condition: bool, message: impl FnOnce() -> String) -> Result<(), DeployError> {
    if condition {
        Ok(())
    } else {
        Err(DeployError::ConfigError(message()))
    }
}

fn validate_disk(disk: Option<&DiskSpec>, owner: &str) -> Result<(), DeployError> {
    let disk = disk.ok_or_else(|| DeployError::ConfigError(format!("{}.disk is required", owner)))?;
    require(disk.enabled, || format!("{}.disk.enabled must be true", owner))?;
    require(!disk.device.trim().is_empty(), || format!("{}.disk.device is required", owner))?;
    require(!disk.mount_point.trim().is_empty(), || {
        format!("{}.disk.mount_point is required", owner)
    })?;
    require(!disk.filesystem.trim().is_empty(), || {
        format!("{}.disk.filesystem must not be empty", owner)
    })
}

/// Check every structural rule of a deployment file
pub fn validate(spec: &DeploymentSpec) -> Result<(), DeployError> {
    let mode = spec
        .mode
        .ok_or_else(|| DeployError::ConfigError("deployment_mode is required".into()))?;

    require(!spec.credentials.root_user.is_empty(), || "credentials.root_user is required".into())?;
    require(!spec.credentials.root_password.is_empty(), || {
        "credentials.root_password is required".into()
    })?;

    let (server, console) = (spec.server_port(), spec.console_port());
    require(server != 0 && console != 0, || "service ports must be non-zero".into())?;
    require(server != console, || {
        format!("server_port and console_port must differ (both {})", server)
    })?;
    require(spec.minio.fanout_workers > 0, || "minio.fanout_workers must be positive".into())?;

    let mut seen = HashSet::new();
    for bucket in &spec.minio.buckets {
        require(!bucket.name.trim().is_empty(), || "bucket name must not be empty".into())?;
        require(seen.insert(bucket.name.as_str()), || {
            format!("bucket {} is listed twice", bucket.name)
        })?;
    }

    match mode {
        DeploymentMode::Standalone => {
            let host = spec
                .standalone
                .as_ref()
                .ok_or_else(|| DeployError::ConfigError("standalone block is required".into()))?;
            require(!host.data_dir.is_empty(), || "standalone.data_dir is required".into())?;
            validate_disk(host.disk.as_ref(), "standalone")?;
        }
        DeploymentMode::Cluster => {
            let nodes = spec.nodes();
            require(!nodes.is_empty(), || "cluster mode needs at least one node".into())?;
            for (i, node) in nodes.iter().enumerate() {
                let owner = format!("cluster.nodes[{}]", i);
                require(!node.host.is_empty(), || format!("{}.host is required", owner))?;
                require(!node.ip.is_empty(), || format!("{}.ip is required", owner))?;
                require(!node.data_dir.is_empty(), || format!("{}.data_dir is required", owner))?;
                validate_disk(node.disk.as_ref(), &owner)?;
            }
        }
    }

    Ok(())
}
