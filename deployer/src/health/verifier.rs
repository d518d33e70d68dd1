//! Comprehensive post-start verification and bucket provisioning

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::config::{BucketPolicy, BucketSpec, Credentials};
use crate::errors::DeployError;
use crate::health::probe::{probe_health_endpoint, probe_port, probe_service_active, RetryPolicy};
use crate::health::report::{HealthReport, ProbeResult};
use crate::service::SERVICE_NAME;
use crate::shell::{CommandOutput, HostShell};
use crate::utils::sh_quote;

/// Client alias registered on the target for smoke tests and provisioning
pub const CLIENT_ALIAS: &str = "minio-local";

/// Bucket created and removed by the smoke test
pub const SMOKE_BUCKET: &str = "test-bucket";

/// Deprecation notice some client releases print while still applying the
/// change. Output carrying it is not a failure.
pub const BENIGN_CLI_WARNING: &str = "Please use 'mc quota'";

/// Where the service should be answering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Address probed from the operator machine
    pub address: String,
    pub server_port: u16,
    pub console_port: u16,
    pub secure: bool,
}

impl ServiceEndpoint {
    /// URL the client tool uses from the target itself
    pub fn loopback_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://127.0.0.1:{}", scheme, self.server_port)
    }
}

fn combined(output: &CommandOutput) -> String {
    format!("{}\n{}", output.stdout, output.stderr)
}

/// Bucket creation refused because the bucket is already there
pub fn already_exists(output: &CommandOutput) -> bool {
    let text = combined(output).to_lowercase();
    text.contains("already exists") || text.contains("already own it")
}

pub fn is_benign(output: &CommandOutput) -> bool {
    combined(output).contains(BENIGN_CLI_WARNING)
}

/// `mc anonymous set` level for a policy
pub fn anonymous_level(policy: BucketPolicy) -> &'static str {
    match policy {
        BucketPolicy::Public => "public",
        BucketPolicy::Private => "none",
    }
}

pub struct HealthVerifier {
    shell: Arc<dyn HostShell>,
    http: Client,
    policy: RetryPolicy,
    client_path: String,
}

impl HealthVerifier {
    pub fn new(shell: Arc<dyn HostShell>, http: Client, policy: RetryPolicy) -> Self {
        Self {
            shell,
            http,
            policy,
            client_path: "mc".to_string(),
        }
    }

    /// Use an installed client binary instead of the one on `PATH`
    pub fn with_client_path(mut self, path: impl Into<String>) -> Self {
        self.client_path = path.into();
        self
    }

    async fn mc(&self, args: &str) -> CommandOutput {
        self.shell
            .exec(&format!("{} {}", sh_quote(&self.client_path), args))
            .await
    }

    async fn client_available(&self) -> ProbeResult {
        let output = self.mc("--version").await;
        if output.success() {
            let version = output.text().lines().next().unwrap_or_default().to_string();
            ProbeResult::pass(version)
        } else {
            ProbeResult::fail(format!("client tool unavailable: {}", output.error_detail()))
        }
    }

    async fn set_alias(&self, endpoint: &ServiceEndpoint, credentials: &Credentials) -> CommandOutput {
        self.mc(&format!(
            "alias set {} {} {} {}",
            CLIENT_ALIAS,
            sh_quote(&endpoint.loopback_url()),
            sh_quote(&credentials.root_user),
            sh_quote(&credentials.root_password)
        ))
        .await
    }

    /// List buckets, then create and drop a scratch bucket
    pub async fn check_bucket_access(&self, endpoint: &ServiceEndpoint, credentials: &Credentials) -> ProbeResult {
        let output = self.set_alias(endpoint, credentials).await;
        if !output.success() {
            return ProbeResult::fail(format!("alias set failed: {}", output.error_detail()));
        }

        let output = self.mc(&format!("ls {}", CLIENT_ALIAS)).await;
        if !output.success() {
            return ProbeResult::fail(format!("bucket listing failed: {}", output.error_detail()));
        }

        let bucket = format!("{}/{}", CLIENT_ALIAS, SMOKE_BUCKET);
        let output = self.mc(&format!("mb {}", bucket)).await;
        if output.success() {
            let removed = self.mc(&format!("rb {} --force", bucket)).await;
            if !removed.success() {
                warn!(host = %self.shell.target(), "cannot remove {}: {}", bucket, removed.error_detail());
            }
        } else {
            warn!(host = %self.shell.target(), "cannot create {}, it may already exist: {}", bucket, output.error_detail());
        }
        ProbeResult::pass("bucket listing succeeded")
    }

    /// Create buckets, apply their anonymous policy and quota. A failed quota
    /// is only a warning.
    pub async fn provision_buckets(
        &self,
        endpoint: &ServiceEndpoint,
        credentials: &Credentials,
        buckets: &[BucketSpec],
    ) -> Result<(), DeployError> {
        let host = self.shell.target().to_string();
        let fail = |detail: String| DeployError::RemoteCommandFailure {
            host: host.clone(),
            detail,
        };

        let output = self.set_alias(endpoint, credentials).await;
        if !output.success() && !is_benign(&output) {
            return Err(fail(format!("alias set failed: {}", output.error_detail())));
        }

        for bucket in buckets {
            let target = format!("{}/{}", CLIENT_ALIAS, bucket.name);

            let output = self.mc(&format!("mb {}", sh_quote(&target))).await;
            if already_exists(&output) {
                warn!(host = %host, "bucket {} already exists", bucket.name);
            } else if !output.success() && !is_benign(&output) {
                return Err(fail(format!("cannot create bucket {}: {}", bucket.name, output.error_detail())));
            } else {
                info!(host = %host, "created bucket {}", bucket.name);
            }

            let output = self
                .mc(&format!("anonymous set {} {}", anonymous_level(bucket.policy), sh_quote(&target)))
                .await;
            if !output.success() && !is_benign(&output) {
                return Err(fail(format!(
                    "cannot set {} policy on {}: {}",
                    bucket.policy.as_str(),
                    bucket.name,
                    output.error_detail()
                )));
            }

            if let Some(quota) = &bucket.quota {
                let output = self
                    .mc(&format!("quota set {} --size {}", sh_quote(&target), sh_quote(quota)))
                    .await;
                if output.success() || is_benign(&output) {
                    info!(host = %host, "quota {} set on {}", quota, bucket.name);
                } else {
                    warn!(host = %host, "cannot set quota on {}: {}", bucket.name, output.error_detail());
                }
            }
        }
        Ok(())
    }

    /// Run every check in order and, when healthy, provision `buckets`
    pub async fn run_comprehensive(
        &self,
        endpoint: &ServiceEndpoint,
        credentials: &Credentials,
        buckets: &[BucketSpec],
    ) -> Result<HealthReport, DeployError> {
        let address = endpoint.address.as_str();
        let mut report = HealthReport::new(address);

        report.service_active = ProbeResult::from_bool(
            probe_service_active(self.shell.as_ref(), SERVICE_NAME).await,
            "service is active",
            "service is not active",
        );

        report.port_listening = ProbeResult::from_bool(
            probe_port(address, endpoint.server_port, &self.policy).await,
            format!("{}:{} is listening", address, endpoint.server_port),
            format!("{}:{} is not listening", address, endpoint.server_port),
        );

        let console_policy = RetryPolicy::single(self.policy.timeout);
        report.console_port_listening = ProbeResult::from_bool(
            probe_port(address, endpoint.console_port, &console_policy).await,
            format!("{}:{} is listening", address, endpoint.console_port),
            format!("{}:{} is not listening", address, endpoint.console_port),
        );

        let (healthy, body) = probe_health_endpoint(
            &self.http,
            address,
            endpoint.server_port,
            endpoint.secure,
            &self.policy,
        )
        .await;
        report.health_endpoint = ProbeResult { ok: healthy, detail: body };

        report.client_available = self.client_available().await;

        report.bucket_access = if report.client_available.ok && report.health_endpoint.ok {
            self.check_bucket_access(endpoint, credentials).await
        } else {
            ProbeResult::fail("skipped: client tool unavailable or health endpoint failing")
        };

        let overall = report.overall_status();
        for (name, result, gating) in report.checks() {
            let mark = if result.ok { "ok" } else { "FAILED" };
            info!(host = %address, gating, "{}: {} {}", name, mark, result.detail);
        }
        info!(host = %address, "overall status: {}", if overall { "healthy" } else { "unhealthy" });

        if overall && !buckets.is_empty() {
            if report.client_available.ok {
                self.provision_buckets(endpoint, credentials, buckets).await?;
            } else {
                warn!(
                    host = %address,
                    "client tool unavailable, skipping provisioning of {} bucket(s)",
                    buckets.len()
                );
            }
        }

        Ok(report)
    }
}

/// Short timeout client for liveness probes
pub fn probe_client(timeout: Duration) -> Result<Client, DeployError> {
    Ok(Client::builder().timeout(timeout).build()?)
}
