//! Data-disk preparation: format, mount, persist, verify

use tracing::{info, warn};

use crate::disk::inspector::{parse_mounts, SafetyInspector};
use crate::errors::DeployError;
use crate::utils::sh_quote;

/// Static mount table
pub const FSTAB: &str = "/etc/fstab";

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Arguments of [`SafetyInspector::prepare_disk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRequest {
    pub device: String,
    pub mount_point: String,
    pub filesystem: String,
    pub format: bool,
    pub min_free_gb: u64,
}

/// Whether `fstab` already mounts `device` at `mount_point`
pub fn fstab_contains(fstab: &str, device: &str, mount_point: &str) -> bool {
    fstab
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|fields| fields.len() >= 6)
        .any(|fields| fields[0] == device && fields[1] == mount_point)
}

pub fn fstab_entry(device: &str, mount_point: &str, filesystem: &str) -> String {
    format!("{} {} {} defaults 0 2\n", device, mount_point, filesystem)
}

/// `mkfs` invocation that overwrites an existing filesystem
pub fn mkfs_command(filesystem: &str, device: &str) -> String {
    let force = if filesystem.starts_with("ext") { "-F" } else { "-f" };
    format!("mkfs.{} {} {}", filesystem, force, sh_quote(device))
}

/// Available bytes from `df -B1 --output=avail`
pub fn parse_df_avail(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()?
        .parse()
        .ok()
}

impl SafetyInspector {
    fn disk_error(&self, message: String) -> DeployError {
        DeployError::DiskError(format!("{}: {}", self.shell().target(), message))
    }

    async fn run(&self, command: &str, what: &str) -> Result<String, DeployError> {
        let output = self.shell().exec(command).await;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(self.disk_error(format!("{} failed: {}", what, output.error_detail())))
        }
    }

    /// Mount `device` on `mount_point` unless that exact pair is live
    pub async fn mount(&self, device: &str, mount_point: &str) -> Result<(), DeployError> {
        self.run(&format!("mkdir -p {}", sh_quote(mount_point)), "create mount point")
            .await?;

        let table = self.mount_table().await.unwrap_or_default();
        if parse_mounts(&table)
            .iter()
            .any(|(dev, mp)| dev == device && mp == mount_point)
        {
            info!(device = %device, "already mounted on {}", mount_point);
            return Ok(());
        }

        self.run(
            &format!("mount {} {}", sh_quote(device), sh_quote(mount_point)),
            "mount",
        )
        .await?;
        info!(device = %device, "mounted on {}", mount_point);
        Ok(())
    }

    /// Add the mount to the static table unless an identical entry exists
    pub async fn persist_mount(
        &self,
        device: &str,
        mount_point: &str,
        filesystem: &str,
    ) -> Result<(), DeployError> {
        let fstab = self.shell().read_file(FSTAB).await.unwrap_or_default();
        if fstab_contains(&fstab, device, mount_point) {
            info!(device = %device, "{} already lists {}", FSTAB, mount_point);
            return Ok(());
        }

        let mut entry = fstab_entry(device, mount_point, filesystem);
        if !fstab.is_empty() && !fstab.ends_with('\n') {
            entry.insert(0, '\n');
        }
        self.shell().append_file(FSTAB, &entry).await?;
        info!(device = %device, "persisted mount of {} in {}", mount_point, FSTAB);
        Ok(())
    }

    /// Fail unless `path` has at least `min_gb` GiB available
    pub async fn check_free_space(&self, path: &str, min_gb: u64) -> Result<(), DeployError> {
        let stdout = self
            .run(&format!("df -B1 --output=avail {}", sh_quote(path)), "df")
            .await?;
        let available = parse_df_avail(&stdout)
            .ok_or_else(|| self.disk_error(format!("unexpected df output: {}", stdout.trim())))?;
        let available_gb = available as f64 / BYTES_PER_GB as f64;
        if available < min_gb.saturating_mul(BYTES_PER_GB) {
            return Err(self.disk_error(format!(
                "{} has {:.2}GB free, {}GB required",
                path, available_gb, min_gb
            )));
        }
        info!("{} has {:.2}GB free", path, available_gb);
        Ok(())
    }

    /// Full preparation sequence. Stops at the first failing step and
    /// leaves earlier steps in place.
    pub async fn prepare_disk(&self, request: &DiskRequest) -> Result<(), DeployError> {
        let DiskRequest {
            device,
            mount_point,
            filesystem,
            format,
            min_free_gb,
        } = request;
        info!(host = %self.shell().target(), device = %device, "preparing disk for {}", mount_point);

        if !self.is_safe_to_use(device).await {
            return Err(DeployError::SafetyViolation(format!(
                "{} on {} is operating system storage",
                device,
                self.shell().target()
            )));
        }

        if !self.device_exists(device).await {
            return Err(self.disk_error(format!("device {} is not available", device)));
        }

        if *format {
            warn!(device = %device, "formatting as {}", filesystem);
            self.run(&mkfs_command(filesystem, device), "format").await?;
        }

        self.mount(device, mount_point).await?;
        self.persist_mount(device, mount_point, filesystem).await?;
        self.check_free_space(mount_point, *min_free_gb).await?;

        let quoted = sh_quote(mount_point);
        self.run(
            &format!("chown -R root:root {} && chmod -R 0755 {}", quoted, quoted),
            "set permissions",
        )
        .await?;

        info!(device = %device, "disk ready at {}", mount_point);
        Ok(())
    }
}
