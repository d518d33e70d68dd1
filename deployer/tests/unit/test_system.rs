//! Operator prerequisite tests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use minio_deploy::config::parse_spec;
use minio_deploy::deploy::{EngineOptions, OrchestrationEngine};
use minio_deploy::errors::DeployError;
use minio_deploy::health::RetryPolicy;
use minio_deploy::ssh::RemoteClient;
use minio_deploy::system::SystemCheck;

use crate::fakes::{FakeHost, FakeProvider, FakeShell, FakeTransport, OS_MOUNTS};

const CLUSTER: &str = r#"
deployment_mode: cluster
credentials: {root_user: admin, root_password: change-me-now}
cluster:
  nodes:
    - {host: node-1, ip: 10.0.0.11, data_dir: /data/minio}
    - {host: node-2, ip: 10.0.0.12, data_dir: /data/minio}
"#;

fn prerequisite_message(result: Result<(), DeployError>) -> String {
    match result {
        Err(DeployError::PrerequisiteError(message)) => message,
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_operator_passes_every_check() {
    let shell = Arc::new(FakeShell::operator());

    SystemCheck::new(shell.clone()).run_all().await.unwrap();

    assert!(shell.ran("command -v ssh-keygen"));
    assert!(shell.ran("command -v file"));
}

#[tokio::test]
async fn test_non_linux_operator_is_refused() {
    let shell = Arc::new(FakeShell::local("operator").ok("uname -s", "Darwin\n").ok("", ""));

    let message = prerequisite_message(SystemCheck::new(shell.clone()).run_all().await);

    assert_eq!(message, "unsupported operating system: Darwin");
    assert!(!shell.ran("id -u"));
}

#[tokio::test]
async fn test_non_root_operator_is_refused() {
    let shell = Arc::new(
        FakeShell::local("operator")
            .ok("uname -s", "Linux\n")
            .ok("id -u", "1000\n")
            .ok("command -v", ""),
    );

    let message = prerequisite_message(SystemCheck::new(shell.clone()).run_all().await);

    assert_eq!(message, "root privileges are required");
    assert!(!shell.ran("command -v"));
}

#[tokio::test]
async fn test_missing_tools_are_all_reported() {
    let shell = Arc::new(
        FakeShell::local("operator")
            .ok("uname -s", "Linux\n")
            .ok("id -u", "0\n")
            .fail("command -v ssh-keygen", "")
            .fail("command -v file", ""),
    );

    let message = prerequisite_message(SystemCheck::new(shell).run_all().await);

    assert_eq!(message, "missing commands: ssh-keygen, file");
}

#[tokio::test]
async fn test_failed_prerequisite_stops_run_before_remote_work() {
    let operator = Arc::new(
        FakeShell::local("operator")
            .ok("uname -s", "Linux\n")
            .ok("id -u", "0\n")
            .ok("command -v ssh-keygen", "")
            .fail("command -v file", ""),
    );
    let nodes: Vec<Arc<FakeShell>> = ["node-1", "node-2"]
        .iter()
        .map(|name| Arc::new(FakeShell::new(name).with_file("/proc/mounts", OS_MOUNTS).ok("", "")))
        .collect();
    let mut provider = FakeProvider::new(operator.clone());
    for node in &nodes {
        provider = provider.with(node.clone());
    }
    let transport = Arc::new(
        FakeTransport::new()
            .host("10.0.0.11", FakeHost::key_trusted())
            .host("10.0.0.12", FakeHost::key_trusted()),
    );
    let engine = OrchestrationEngine::new(
        EngineOptions {
            dry_run: false,
            health_policy: RetryPolicy::new(1, Duration::ZERO, Duration::from_secs(1)),
            default_key: Some(PathBuf::from("/home/ops/.ssh/id_rsa")),
            workers: None,
        },
        Arc::new(provider),
        Arc::new(RemoteClient::new(transport.clone())),
        reqwest::Client::new(),
    );

    let result = engine.run_spec(parse_spec(CLUSTER, None).unwrap()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, DeployError::PrerequisiteError(ref m) if m == "missing commands: file"));
    assert_eq!(err.exit_code(), 1);
    assert!(transport.attempts().is_empty());
    for node in &nodes {
        assert!(node.commands().is_empty(), "{}", node.commands().join("\n"));
    }
}
