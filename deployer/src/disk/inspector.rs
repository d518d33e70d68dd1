//! Refuses any operation on operating-system storage

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{error, info, warn};

use crate::shell::HostShell;
use crate::utils::sh_quote;

/// Mount points whose backing devices are never touched
pub const PROTECTED_MOUNTPOINTS: &[&str] = &["/", "/boot", "/boot/efi"];

/// Live mount table
pub const MOUNT_TABLE: &str = "/proc/mounts";

const WHOLE_DISK_PATTERN: &str = r"^/dev/[a-zA-Z]+";
static WHOLE_DISK: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(WHOLE_DISK_PATTERN));

/// `(device, mountpoint)` pairs of a mount table
pub fn parse_mounts(table: &str) -> Vec<(String, String)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = fields.next()?;
            Some((device.to_string(), mountpoint.to_string()))
        })
        .collect()
}

/// Entries of `table` mounted on a protected mount point
pub fn protected_mounts(table: &str) -> BTreeSet<(String, String)> {
    parse_mounts(table)
        .into_iter()
        .filter(|(_, mountpoint)| PROTECTED_MOUNTPOINTS.contains(&mountpoint.as_str()))
        .collect()
}

/// Whole-disk identifier of a partition, e.g. `/dev/sda1` to `/dev/sda`
pub fn disk_of(partition: &str) -> Option<String> {
    let pattern = WHOLE_DISK.as_ref().ok()?;
    pattern.find(partition).map(|m| m.as_str().to_string())
}

/// Why `device` may not be used, given the protected mounts
pub fn unsafe_reason(device: &str, protected: &BTreeSet<(String, String)>) -> Option<String> {
    if let Some((_, mountpoint)) = protected.iter().find(|(dev, _)| dev == device) {
        return Some(format!("{} is the operating system partition for {}", device, mountpoint));
    }
    let disks: BTreeSet<String> = protected.iter().filter_map(|(dev, _)| disk_of(dev)).collect();
    if disks.contains(device) {
        return Some(format!("{} is a disk holding operating system partitions", device));
    }
    None
}

pub struct SafetyInspector {
    shell: Arc<dyn HostShell>,
}

impl SafetyInspector {
    pub fn new(shell: Arc<dyn HostShell>) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &Arc<dyn HostShell> {
        &self.shell
    }

    pub(crate) async fn mount_table(&self) -> Option<String> {
        self.shell.read_file(MOUNT_TABLE).await
    }

    /// Root, boot and EFI partitions of the target. `None` if the mount
    /// table cannot be read.
    pub async fn list_os_protected_mountpoints(&self) -> Option<BTreeSet<(String, String)>> {
        let table = self.mount_table().await?;
        let protected = protected_mounts(&table);
        info!(host = %self.shell.target(), "protected partitions: {:?}", protected);
        Some(protected)
    }

    /// Whole disks that carry a protected partition
    pub async fn protected_disks(&self) -> BTreeSet<String> {
        self.list_os_protected_mountpoints()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|(dev, _)| disk_of(dev))
            .collect()
    }

    /// False if `device` is, or contains, an operating-system partition.
    /// An unreadable mount table is treated as unsafe.
    pub async fn is_safe_to_use(&self, device: &str) -> bool {
        let host = self.shell.target();
        let Some(protected) = self.list_os_protected_mountpoints().await else {
            error!(host = %host, "cannot read {}, refusing to use {}", MOUNT_TABLE, device);
            return false;
        };
        match unsafe_reason(device, &protected) {
            Some(reason) => {
                error!(host = %host, device = %device, "{}", reason);
                false
            }
            None => {
                info!(host = %host, device = %device, "device is not operating system storage");
                true
            }
        }
    }

    /// Whether the block device exists and `lsblk` can see it
    pub async fn device_exists(&self, device: &str) -> bool {
        let quoted = sh_quote(device);
        let output = self
            .shell
            .exec(&format!("test -e {} && lsblk {}", quoted, quoted))
            .await;
        if !output.success() {
            warn!(host = %self.shell.target(), device = %device, "device not available: {}", output.error_detail());
        }
        output.success()
    }
}
