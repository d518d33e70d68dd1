//! Binary installation and service provisioning tests

use std::sync::Arc;

use minio_deploy::config::{Credentials, ServiceSettings};
use minio_deploy::errors::DeployError;
use minio_deploy::service::{
    generate_unit, BinaryInstaller, Product, ServiceProvisioner, UnitConfig, ENV_PATH, UNIT_PATH,
};
use minio_deploy::shell::CommandOutput;
use minio_deploy::utils::sha256_hash;

use crate::fakes::FakeShell;

const SERVER_BYTES: &[u8] = b"\x7fELF fake minio server";

fn unit() -> minio_deploy::service::GeneratedUnit {
    generate_unit(&UnitConfig {
        install_dir: "/usr/local/bin".to_string(),
        data_dir: "/mnt/minio".to_string(),
        volumes: "/mnt/minio".to_string(),
        listen_port: 9000,
        console_port: 9001,
        credentials: Credentials {
            root_user: "admin".to_string(),
            root_password: "change-me-now".to_string(),
        },
        erasure_coding: None,
    })
}

#[tokio::test]
async fn test_provisioner_starts_service() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .ok("systemctl is-active minio", "active\n")
            .ok("", ""),
    );
    let provisioner = ServiceProvisioner::new(shell.clone());

    provisioner.configure("/mnt/minio", &unit()).await.unwrap();

    let commands = shell.commands();
    let systemctl: Vec<&str> = commands
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("systemctl"))
        .collect();
    assert_eq!(
        systemctl,
        vec![
            "systemctl daemon-reload",
            "systemctl enable minio",
            "systemctl start minio",
            "systemctl is-active minio",
        ]
    );
    assert_eq!(commands[0], "mkdir -p /mnt/minio");
    assert_eq!(
        shell.writes(),
        vec![
            (UNIT_PATH.to_string(), Some(0o644)),
            (ENV_PATH.to_string(), Some(0o600)),
        ]
    );
    assert!(shell.file(ENV_PATH).unwrap().contains("MINIO_ROOT_USER=\"admin\""));
}

#[tokio::test]
async fn test_provisioner_reports_journal_on_failed_start() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .respond("systemctl is-active minio", CommandOutput::new(3, "failed\n", ""))
            .respond("systemctl status minio", CommandOutput::new(3, "Active: failed (Result: exit-code)\n", ""))
            .ok("journalctl -u minio", "ERROR Unable to use the drive /mnt/minio: drive not found\n")
            .ok("", ""),
    );
    let provisioner = ServiceProvisioner::new(shell.clone());

    let result = provisioner.configure("/mnt/minio", &unit()).await;

    match result {
        Err(DeployError::ServiceError(message)) => {
            assert!(message.starts_with("node-1: minio not active"));
            assert!(message.contains("Active: failed"));
            assert!(message.contains("drive not found"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(shell.ran("journalctl -u minio -n 50 --no-pager"));
}

fn settings(package_dir: &std::path::Path) -> ServiceSettings {
    ServiceSettings {
        local_package_dir: package_dir.to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_installer_downloads_on_target() {
    let target = Arc::new(FakeShell::new("node-1").ok("uname -m", "x86_64\n").ok("curl", ""));
    let local = Arc::new(FakeShell::local("operator"));
    let dir = tempfile::tempdir().unwrap();
    let installer = BinaryInstaller::new(target.clone(), local, settings(dir.path()));

    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.server_path, "/usr/local/bin/minio");
    assert_eq!(outcome.client_path.as_deref(), Some("/usr/local/bin/mc"));
    assert!(target.ran("curl -fsSL -o /usr/local/bin/minio.part https://dl.min.io/server/minio/release/linux-amd64/minio"));
    assert!(target.ran("https://dl.min.io/client/mc/release/linux-amd64/mc"));
    assert!(!target.ran("wget"));
    assert!(target.writes().is_empty());
}

#[tokio::test]
async fn test_installer_falls_back_to_local_package() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("minio"), SERVER_BYTES).unwrap();
    std::fs::write(
        dir.path().join("minio.sha256"),
        format!("{}  minio\n", sha256_hash(SERVER_BYTES)),
    )
    .unwrap();
    std::fs::write(dir.path().join("README.md"), "packages").unwrap();

    let target = Arc::new(
        FakeShell::new("node-1")
            .ok("uname -m", "x86_64\n")
            .fail("curl", "curl: (6) Could not resolve host: dl.min.io")
            .fail("wget", "wget: unable to resolve host address")
            .ok("rm -f", ""),
    );
    let local = Arc::new(FakeShell::local("operator").ok(
        "file -b",
        "ELF 64-bit LSB executable, x86-64, version 1 (SYSV), statically linked\n",
    ));
    let installer = BinaryInstaller::new(target.clone(), local.clone(), settings(dir.path()));

    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.server_path, "/usr/local/bin/minio");
    assert_eq!(outcome.client_path, None);
    assert_eq!(
        target.writes(),
        vec![("/usr/local/bin/minio".to_string(), Some(0o755))]
    );
    assert_eq!(
        target.file("/usr/local/bin/minio").unwrap().as_bytes(),
        String::from_utf8_lossy(SERVER_BYTES).as_bytes()
    );
    assert_eq!(local.count("file -b"), 1);
    assert!(target.ran("rm -f /usr/local/bin/minio.part"));
}

#[tokio::test]
async fn test_installer_rejects_checksum_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("minio"), SERVER_BYTES).unwrap();
    std::fs::write(dir.path().join("minio.sha256"), format!("{}\n", sha256_hash(b"other"))).unwrap();

    let target = Arc::new(FakeShell::new("node-1").ok("uname -m", "x86_64\n").ok("rm -f", ""));
    let local = Arc::new(FakeShell::local("operator").ok("file -b", "ELF 64-bit LSB executable, x86-64\n"));
    let installer = BinaryInstaller::new(target.clone(), local.clone(), settings(dir.path()));

    let result = installer.resolve_binary(Product::Server).await;

    assert!(matches!(result, Err(DeployError::InstallResolutionExhausted(ref m)) if m == "minio for node-1"));
    assert!(target.writes().is_empty());
    assert!(!local.ran("file -b"));
}

#[tokio::test]
async fn test_installer_skips_foreign_architecture() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("minio"), SERVER_BYTES).unwrap();

    let target = Arc::new(FakeShell::new("node-1").ok("uname -m", "aarch64\n").ok("rm -f", ""));
    let local = Arc::new(FakeShell::local("operator").ok("file -b", "ELF 64-bit LSB executable, x86-64\n"));
    let installer = BinaryInstaller::new(target.clone(), local, settings(dir.path()));

    let result = installer.install().await;

    assert!(matches!(result, Err(DeployError::InstallResolutionExhausted(_))));
    assert!(target.ran("linux-arm64/minio"));
    assert!(target.writes().is_empty());
}

#[tokio::test]
async fn test_installer_downloads_for_unlisted_architecture() {
    let target = Arc::new(FakeShell::new("node-1").ok("uname -m", "ppc64le\n").ok("curl", ""));
    let local = Arc::new(FakeShell::local("operator"));
    let dir = tempfile::tempdir().unwrap();
    let installer = BinaryInstaller::new(target.clone(), local, settings(dir.path()));

    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.server_path, "/usr/local/bin/minio");
    assert!(target.ran("https://dl.min.io/server/minio/release/linux-ppc64le/minio"));
    assert!(target.ran("https://dl.min.io/client/mc/release/linux-ppc64le/mc"));
}

#[tokio::test]
async fn test_installer_runs_package_on_unlisted_architecture() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("minio"), SERVER_BYTES).unwrap();

    let target = Arc::new(
        FakeShell::new("node-1")
            .ok("uname -m", "ppc64le\n")
            .fail("curl", "curl: (6) Could not resolve host: dl.min.io")
            .fail("wget", "wget: unable to resolve host address")
            .ok("timeout 5 /usr/local/bin/minio.candidate --version", "minio version RELEASE.2024-01-18T22-51-48Z\n")
            .ok("mv -f", "")
            .ok("rm -f", ""),
    );
    let local = Arc::new(FakeShell::local("operator"));
    let installer = BinaryInstaller::new(target.clone(), local.clone(), settings(dir.path()));

    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.server_path, "/usr/local/bin/minio");
    assert_eq!(outcome.client_path, None);
    assert!(target.ran("linux-ppc64le/minio"));
    assert_eq!(
        target.writes(),
        vec![("/usr/local/bin/minio.candidate".to_string(), Some(0o755))]
    );
    assert!(target.ran("mv -f /usr/local/bin/minio.candidate /usr/local/bin/minio"));
    assert!(!local.ran("file -b"));
}

#[tokio::test]
async fn test_installer_drops_package_that_does_not_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("minio"), SERVER_BYTES).unwrap();

    let target = Arc::new(
        FakeShell::new("node-1")
            .ok("uname -m", "s390x\n")
            .fail("timeout 5", "cannot execute binary file: Exec format error")
            .ok("rm -f", ""),
    );
    let local = Arc::new(FakeShell::local("operator"));
    let installer = BinaryInstaller::new(target.clone(), local, settings(dir.path()));

    let result = installer.resolve_binary(Product::Server).await;

    assert!(matches!(result, Err(DeployError::InstallResolutionExhausted(_))));
    assert!(target.ran("rm -f /usr/local/bin/minio.candidate"));
    assert!(!target.ran("mv -f"));
}
