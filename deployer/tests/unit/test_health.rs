//! Health probe and verifier tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use minio_deploy::config::{BucketPolicy, BucketSpec, Credentials};
use minio_deploy::errors::DeployError;
use minio_deploy::health::{
    probe_health_endpoint_with, probe_port_with, HealthReport, HealthVerifier, ProbeResult,
    RetryPolicy, ServiceEndpoint, HEALTH_PATH,
};
use minio_deploy::shell::CommandOutput;

use crate::fakes::FakeShell;

fn quick(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::ZERO, Duration::from_secs(2))
}

fn credentials() -> Credentials {
    Credentials {
        root_user: "admin".to_string(),
        root_password: "change-me-now".to_string(),
    }
}

/// Port that was free a moment ago
fn reserved_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve_health(status: StatusCode) -> (u16, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        HEALTH_PATH,
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (status, "")
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, hits)
}

#[tokio::test]
async fn test_port_probe_succeeds_once_listener_appears() {
    let port = reserved_port();
    let sleeps = AtomicU32::new(0);
    let listener = Mutex::new(None);

    let policy = RetryPolicy::new(5, Duration::from_secs(5), Duration::from_secs(2));

    let open = probe_port_with("127.0.0.1", port, &policy, |delay: Duration| {
        assert_eq!(delay, Duration::from_secs(5));
        if sleeps.fetch_add(1, Ordering::SeqCst) + 1 == 4 {
            *listener.lock().unwrap() = Some(std::net::TcpListener::bind(("127.0.0.1", port)).unwrap());
        }
        async {}
    })
    .await;

    assert!(open);
    assert_eq!(sleeps.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_port_probe_gives_up_after_attempts() {
    let port = reserved_port();
    let sleeps = AtomicU32::new(0);

    let open = probe_port_with("127.0.0.1", port, &quick(3), |_: Duration| {
        sleeps.fetch_add(1, Ordering::SeqCst);
        async {}
    })
    .await;

    assert!(!open);
    assert_eq!(sleeps.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_health_endpoint_accepts_only_200() {
    let client = reqwest::Client::new();

    let (port, hits) = serve_health(StatusCode::OK).await;
    let (ok, _) = probe_health_endpoint_with(&client, "127.0.0.1", port, false, &quick(3), |_: Duration| async {}).await;
    assert!(ok);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let (port, hits) = serve_health(StatusCode::SERVICE_UNAVAILABLE).await;
    let (ok, detail) =
        probe_health_endpoint_with(&client, "127.0.0.1", port, false, &quick(3), |_: Duration| async {}).await;
    assert!(!ok);
    assert!(detail.contains("HTTP 503"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[test]
fn test_overall_status_ignores_non_gating_checks() {
    for bits in 0u32..64 {
        let flag = |i: u32| ProbeResult::from_bool(bits & (1 << i) != 0, "ok", "failed");
        let mut report = HealthReport::new("node-1");
        report.service_active = flag(0);
        report.port_listening = flag(1);
        report.console_port_listening = flag(2);
        report.health_endpoint = flag(3);
        report.client_available = flag(4);
        report.bucket_access = flag(5);

        let expected = bits & 0b1011 == 0b1011;
        assert_eq!(report.overall_status(), expected, "combination {:06b}", bits);
        assert_eq!(report.failures().is_empty(), expected);
    }
}

fn healthy_node() -> FakeShell {
    FakeShell::new("node-1")
        .ok("systemctl is-active minio", "active\n")
        .ok("mc --version", "mc version RELEASE.2024-11-21T17-21-54Z\nRuntime: go1.23\n")
        .ok("mc ", "")
}

#[tokio::test]
async fn test_comprehensive_check_on_healthy_node() {
    let (port, _) = serve_health(StatusCode::OK).await;
    let console = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = ServiceEndpoint {
        address: "127.0.0.1".to_string(),
        server_port: port,
        console_port: console.local_addr().unwrap().port(),
        secure: false,
    };
    let shell = Arc::new(healthy_node());
    let verifier = HealthVerifier::new(shell.clone(), reqwest::Client::new(), quick(2));

    let report = verifier.run_comprehensive(&endpoint, &credentials(), &[]).await.unwrap();

    assert!(report.overall_status());
    assert!(report.console_port_listening.ok);
    assert!(report.bucket_access.ok);
    assert_eq!(report.client_available.detail, "mc version RELEASE.2024-11-21T17-21-54Z");
    assert!(shell.ran(&format!("mc alias set minio-local http://127.0.0.1:{} admin change-me-now", port)));
    assert!(shell.ran("mc mb minio-local/test-bucket"));
    assert!(shell.ran("mc rb minio-local/test-bucket --force"));
}

#[tokio::test]
async fn test_comprehensive_check_reports_stopped_service() {
    let port = reserved_port();
    let endpoint = ServiceEndpoint {
        address: "127.0.0.1".to_string(),
        server_port: port,
        console_port: port,
        secure: false,
    };
    let shell = Arc::new(
        FakeShell::new("node-1")
            .respond("systemctl is-active minio", CommandOutput::new(3, "failed\n", ""))
            .fail("mc", "mc: command not found"),
    );
    let verifier = HealthVerifier::new(shell.clone(), reqwest::Client::new(), quick(1));
    let buckets = vec![BucketSpec {
        name: "backups".to_string(),
        policy: BucketPolicy::Private,
        quota: None,
    }];

    let report = verifier.run_comprehensive(&endpoint, &credentials(), &buckets).await.unwrap();

    assert!(!report.overall_status());
    assert_eq!(
        report.failures(),
        vec!["service active", "port listening", "health endpoint"]
    );
    assert!(!report.bucket_access.ok);
    assert!(!shell.ran("mc mb"));
}

#[tokio::test]
async fn test_missing_client_skips_bucket_provisioning() {
    let (port, _) = serve_health(StatusCode::OK).await;
    let endpoint = ServiceEndpoint {
        address: "127.0.0.1".to_string(),
        server_port: port,
        console_port: reserved_port(),
        secure: false,
    };
    let shell = Arc::new(
        FakeShell::new("node-1")
            .ok("systemctl is-active minio", "active\n")
            .fail("mc", "sh: mc: not found"),
    );
    let verifier = HealthVerifier::new(shell.clone(), reqwest::Client::new(), quick(1));
    let buckets = vec![BucketSpec {
        name: "backups".to_string(),
        policy: BucketPolicy::Public,
        quota: None,
    }];

    let report = verifier.run_comprehensive(&endpoint, &credentials(), &buckets).await.unwrap();

    assert!(report.overall_status());
    assert!(!report.client_available.ok);
    assert!(!report.bucket_access.ok);
    assert_eq!(shell.count("mc "), 1);
    assert!(!shell.ran("mc mb"));
    assert!(!shell.ran("mc anonymous"));
}

fn endpoint() -> ServiceEndpoint {
    ServiceEndpoint {
        address: "10.0.0.5".to_string(),
        server_port: 9000,
        console_port: 9001,
        secure: false,
    }
}

#[tokio::test]
async fn test_provision_buckets_tolerates_existing_bucket_and_quota_warning() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .fail("mc mb minio-local/logs", "Your previous request to create the named bucket succeeded and you already own it.")
            .fail("mc quota set", "Please use 'mc quota' instead")
            .ok("mc ", ""),
    );
    let verifier = HealthVerifier::new(shell.clone(), reqwest::Client::new(), quick(1));
    let buckets = vec![
        BucketSpec {
            name: "logs".to_string(),
            policy: BucketPolicy::Private,
            quota: Some("10GiB".to_string()),
        },
        BucketSpec {
            name: "assets".to_string(),
            policy: BucketPolicy::Public,
            quota: None,
        },
    ];

    verifier.provision_buckets(&endpoint(), &credentials(), &buckets).await.unwrap();

    assert!(shell.ran("mc anonymous set none minio-local/logs"));
    assert!(shell.ran("mc quota set minio-local/logs --size 10GiB"));
    assert!(shell.ran("mc mb minio-local/assets"));
    assert!(shell.ran("mc anonymous set public minio-local/assets"));
}

#[tokio::test]
async fn test_provision_buckets_fails_on_policy_error() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .fail("mc anonymous set", "mc: <ERROR> Access Denied.")
            .ok("mc ", ""),
    );
    let verifier = HealthVerifier::new(shell.clone(), reqwest::Client::new(), quick(1));
    let buckets = vec![
        BucketSpec {
            name: "media".to_string(),
            policy: BucketPolicy::Public,
            quota: None,
        },
        BucketSpec {
            name: "never".to_string(),
            policy: BucketPolicy::Private,
            quota: None,
        },
    ];

    let result = verifier.provision_buckets(&endpoint(), &credentials(), &buckets).await;

    match result {
        Err(DeployError::RemoteCommandFailure { host, detail }) => {
            assert_eq!(host, "node-1");
            assert!(detail.contains("Access Denied"));
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(!shell.ran("minio-local/never"));
}
