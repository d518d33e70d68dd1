//! Disk safety and preparation tests

use std::sync::Arc;

use minio_deploy::disk::{DiskRequest, SafetyInspector};
use minio_deploy::errors::DeployError;

use crate::fakes::{FakeShell, OS_MOUNTS};

const GIB: u64 = 1024 * 1024 * 1024;

fn request(device: &str) -> DiskRequest {
    DiskRequest {
        device: device.to_string(),
        mount_point: "/mnt/minio".to_string(),
        filesystem: "ext4".to_string(),
        format: true,
        min_free_gb: 10,
    }
}

#[tokio::test]
async fn test_os_storage_is_never_safe() {
    let shell = Arc::new(FakeShell::new("node-1").with_file("/proc/mounts", OS_MOUNTS));
    let inspector = SafetyInspector::new(shell);

    for device in ["/dev/sda1", "/dev/sda2", "/dev/sda3", "/dev/sda"] {
        assert!(!inspector.is_safe_to_use(device).await, "{} must be protected", device);
    }
    assert!(inspector.is_safe_to_use("/dev/sdb").await);
    assert!(inspector.is_safe_to_use("/dev/sdb1").await);
}

#[tokio::test]
async fn test_unreadable_mount_table_is_unsafe() {
    let inspector = SafetyInspector::new(Arc::new(FakeShell::new("node-1")));
    assert!(!inspector.is_safe_to_use("/dev/sdb").await);
}

#[tokio::test]
async fn test_prepare_refuses_root_partition_without_side_effects() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .with_file("/proc/mounts", OS_MOUNTS)
            .ok("", ""),
    );
    let inspector = SafetyInspector::new(shell.clone());

    let result = inspector.prepare_disk(&request("/dev/sda1")).await;

    assert!(matches!(result, Err(DeployError::SafetyViolation(_))));
    assert!(shell.commands().is_empty());
    assert!(shell.writes().is_empty());
}

#[tokio::test]
async fn test_prepare_happy_path() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .with_file("/proc/mounts", OS_MOUNTS)
            .with_file("/etc/fstab", "UUID=abc / ext4 defaults 0 1\n")
            .ok("df -B1", &format!("     Avail\n{}\n", 20 * GIB))
            .ok("", ""),
    );
    let inspector = SafetyInspector::new(shell.clone());

    inspector.prepare_disk(&request("/dev/sdb")).await.unwrap();

    assert_eq!(
        shell.disk_mutations(),
        vec![
            "mkfs.ext4 -F /dev/sdb".to_string(),
            "mount /dev/sdb /mnt/minio".to_string(),
            "chown -R root:root /mnt/minio && chmod -R 0755 /mnt/minio".to_string(),
        ]
    );
    assert_eq!(
        shell.file("/etc/fstab").unwrap(),
        "UUID=abc / ext4 defaults 0 1\n/dev/sdb /mnt/minio ext4 defaults 0 2\n"
    );
}

#[tokio::test]
async fn test_prepare_stops_when_space_is_short() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .with_file("/proc/mounts", OS_MOUNTS)
            .ok("df -B1", &format!("Avail\n{}\n", 2 * GIB))
            .ok("", ""),
    );
    let inspector = SafetyInspector::new(shell.clone());

    let result = inspector.prepare_disk(&request("/dev/sdb")).await;

    assert!(matches!(result, Err(DeployError::DiskError(ref m)) if m.contains("10GB required")));
    assert!(!shell.ran("chown"));
}

#[tokio::test]
async fn test_huge_space_requirement_is_reported_not_overflowed() {
    let shell = Arc::new(FakeShell::new("node-1").ok("df -B1", &format!("Avail\n{}\n", 2 * GIB)));
    let inspector = SafetyInspector::new(shell);

    let result = inspector.check_free_space("/mnt/minio", u64::MAX).await;

    assert!(matches!(result, Err(DeployError::DiskError(ref m)) if m.contains(&format!("{}GB required", u64::MAX))));
}

#[tokio::test]
async fn test_missing_device_is_disk_error() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .with_file("/proc/mounts", OS_MOUNTS)
            .fail("test -e", "lsblk: /dev/sdz: not a block device"),
    );
    let inspector = SafetyInspector::new(shell.clone());

    let result = inspector.prepare_disk(&request("/dev/sdz")).await;

    assert!(matches!(result, Err(DeployError::DiskError(_))));
    assert!(shell.disk_mutations().is_empty());
}

#[tokio::test]
async fn test_mount_and_persist_are_idempotent() {
    let mounts = format!("{}/dev/sdb /mnt/minio ext4 rw 0 0\n", OS_MOUNTS);
    let shell = Arc::new(
        FakeShell::new("node-1")
            .with_file("/proc/mounts", &mounts)
            .ok("", ""),
    );
    let inspector = SafetyInspector::new(shell.clone());

    inspector.mount("/dev/sdb", "/mnt/minio").await.unwrap();
    inspector.persist_mount("/dev/sdb", "/mnt/minio", "ext4").await.unwrap();
    inspector.persist_mount("/dev/sdb", "/mnt/minio", "ext4").await.unwrap();

    assert!(!shell.ran("mount /dev/sdb"));
    assert_eq!(
        shell.file("/etc/fstab").unwrap(),
        "/dev/sdb /mnt/minio ext4 defaults 0 2\n"
    );
}
