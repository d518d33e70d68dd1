//! Sequences the deployment pipeline.
//!
//! Stages run strictly in order and the first failure ends the run. Nothing
//! applied by earlier stages is undone.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{load_spec, validate, BucketSpec, DeploymentMode, DeploymentSpec};
use crate::deploy::fanout::fan_out;
use crate::deploy::pipeline::{PipelineEvent, PipelineFsm, Stage, StageResult};
use crate::deploy::target::DeployTarget;
use crate::disk::SafetyInspector;
use crate::errors::DeployError;
use crate::firewall::NetworkPolicyManager;
use crate::health::{probe_client, HealthReport, HealthVerifier, RetryPolicy, ServiceEndpoint};
use crate::service::unit::cluster_volumes;
use crate::service::{
    generate_unit, installation_exists, BinaryInstaller, InstallOutcome, Product, ServiceProvisioner,
    UnitConfig, UNIT_PATH,
};
use crate::shell::{HostShell, LocalShell, RemoteShell};
use crate::ssh::{RemoteClient, TrustBootstrapper};
use crate::system::SystemCheck;
use crate::utils::generate_uuid;

/// Hands out the shell that reaches a target
pub trait ShellProvider: Send + Sync {
    /// The operator machine
    fn local(&self) -> Arc<dyn HostShell>;

    fn shell_for(&self, target: &DeployTarget) -> Arc<dyn HostShell>;
}

/// Local targets get a [`LocalShell`], everything else a [`RemoteShell`]
pub struct SystemShells {
    client: Arc<RemoteClient>,
    local: Arc<dyn HostShell>,
}

impl SystemShells {
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            local: Arc::new(LocalShell::new()),
        }
    }
}

impl ShellProvider for SystemShells {
    fn local(&self) -> Arc<dyn HostShell> {
        Arc::clone(&self.local)
    }

    fn shell_for(&self, target: &DeployTarget) -> Arc<dyn HostShell> {
        if target.local {
            Arc::new(LocalShell::named(target.name.as_str()))
        } else {
            Arc::new(RemoteShell::new(
                target.name.as_str(),
                Arc::clone(&self.client),
                target.params.clone(),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Log mutations instead of applying them
    pub dry_run: bool,

    /// Server port and liveness endpoint retries
    pub health_policy: RetryPolicy,

    /// Key pair used for hosts that configure none
    pub default_key: Option<PathBuf>,

    /// Overrides `minio.fanout_workers`
    pub workers: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            health_policy: RetryPolicy::default(),
            default_key: None,
            workers: None,
        }
    }
}

/// What a successful run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: DeploymentMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<String>,
    pub stages: Vec<StageResult>,
    /// Install, service and health stages were skipped by configuration
    pub provisioning_elided: bool,
    pub reports: Vec<HealthReport>,
}

enum SpecSource<'a> {
    File(&'a Path, DeploymentMode),
    Loaded(DeploymentSpec),
}

struct HealthJob {
    name: String,
    shell: Arc<dyn HostShell>,
    endpoint: ServiceEndpoint,
    client_path: Option<String>,
    buckets: Vec<BucketSpec>,
}

/// Keep per-node results in target order, failing with every failed node
fn collect_nodes<R>(
    targets: &[DeployTarget],
    results: Vec<Result<R, DeployError>>,
    wrap: fn(String) -> DeployError,
) -> Result<Vec<R>, DeployError> {
    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (target, result) in targets.iter().zip(results) {
        match result {
            Ok(value) => values.push(value),
            Err(e) => {
                error!(node = %target.name, "{}", e);
                failures.push(format!("{}: {}", target.name, e));
            }
        }
    }
    if failures.is_empty() {
        Ok(values)
    } else {
        Err(wrap(failures.join("; ")))
    }
}

pub struct OrchestrationEngine {
    options: EngineOptions,
    shells: Arc<dyn ShellProvider>,
    client: Arc<RemoteClient>,
    http: Client,
}

impl OrchestrationEngine {
    pub fn new(
        options: EngineOptions,
        shells: Arc<dyn ShellProvider>,
        client: Arc<RemoteClient>,
        http: Client,
    ) -> Self {
        Self {
            options,
            shells,
            client,
            http,
        }
    }

    /// Engine over real SSH sessions and local processes
    pub fn system(options: EngineOptions) -> Result<Self, DeployError> {
        let client = Arc::new(RemoteClient::russh());
        let shells = Arc::new(SystemShells::new(Arc::clone(&client)));
        let http = probe_client(options.health_policy.timeout)?;
        Ok(Self::new(options, shells, client, http))
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Load the deployment file and run every stage
    pub async fn run(&self, config_path: &Path, mode: DeploymentMode) -> Result<RunSummary, DeployError> {
        self.pipeline(SpecSource::File(config_path, mode)).await
    }

    /// Run every stage against an already parsed deployment
    pub async fn run_spec(&self, spec: DeploymentSpec) -> Result<RunSummary, DeployError> {
        self.pipeline(SpecSource::Loaded(spec)).await
    }

    async fn pipeline(&self, source: SpecSource<'_>) -> Result<RunSummary, DeployError> {
        let run_id = generate_uuid();
        let span = info_span!("run", run_id = %run_id, dry_run = self.options.dry_run);
        self.execute(run_id, source).instrument(span).await
    }

    async fn stage<T, Fut>(&self, fsm: &mut PipelineFsm, stage: Stage, work: Fut) -> Result<T, DeployError>
    where
        Fut: Future<Output = Result<T, DeployError>>,
    {
        fsm.process(PipelineEvent::Begin(stage))
            .map_err(DeployError::Internal)?;

        let result = async {
            info!("stage started");
            work.await
        }
        .instrument(info_span!("stage", stage = %stage))
        .await;

        match result {
            Ok(value) => {
                fsm.process(PipelineEvent::Succeed(stage))
                    .map_err(DeployError::Internal)?;
                info!(stage = %stage, "stage passed");
                Ok(value)
            }
            Err(e) => {
                error!(stage = %stage, "stage failed: {}", e);
                fsm.process(PipelineEvent::Fail(stage, e.to_string()))
                    .map_err(DeployError::Internal)?;
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: String, source: SpecSource<'_>) -> Result<RunSummary, DeployError> {
        let started_at = Utc::now();
        let mut fsm = PipelineFsm::new();

        self.stage(&mut fsm, Stage::Prerequisites, self.check_prerequisites())
            .await?;
        let (spec, mut targets) = self
            .stage(&mut fsm, Stage::LoadConfig, Self::load(source))
            .await?;
        info!(
            mode = %spec.mode(),
            targets = targets.len(),
            "deploying to {}",
            targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        self.stage(&mut fsm, Stage::SshTrust, self.bootstrap_trust(&mut targets))
            .await?;
        self.stage(&mut fsm, Stage::OsPartitionCheck, self.check_partitions(&targets))
            .await?;
        self.stage(&mut fsm, Stage::ExistingInstallGuard, self.guard_existing(&targets))
            .await?;
        self.stage(&mut fsm, Stage::Firewall, self.configure_firewall(&spec, &targets))
            .await?;

        let mut reports = Vec::new();
        if spec.minio.provision_service {
            let installs = self
                .stage(&mut fsm, Stage::Install, self.install(&spec, &targets))
                .await?;
            self.stage(&mut fsm, Stage::ServiceConfig, self.configure_services(&spec, &targets))
                .await?;
            reports = self
                .stage(&mut fsm, Stage::HealthCheck, self.verify_health(&spec, &targets, &installs))
                .await?;
            fsm.process(PipelineEvent::Finish)
                .map_err(DeployError::Internal)?;
        } else {
            info!("service provisioning disabled, skipping the remaining stages");
            fsm.process(PipelineEvent::Elide)
                .map_err(DeployError::Internal)?;
        }

        info!("deployment finished");
        Ok(RunSummary {
            run_id,
            mode: spec.mode(),
            dry_run: self.options.dry_run,
            started_at,
            finished_at: Utc::now(),
            targets: targets.into_iter().map(|t| t.name).collect(),
            stages: fsm.results().to_vec(),
            provisioning_elided: fsm.elided(),
            reports,
        })
    }

    fn workers(&self, spec: &DeploymentSpec) -> usize {
        self.options
            .workers
            .unwrap_or(spec.minio.fanout_workers)
            .max(1)
    }

    async fn check_prerequisites(&self) -> Result<(), DeployError> {
        if self.options.dry_run {
            info!("[dry run] skipping prerequisite checks");
            return Ok(());
        }
        SystemCheck::new(self.shells.local()).run_all().await
    }

    async fn load(source: SpecSource<'_>) -> Result<(DeploymentSpec, Vec<DeployTarget>), DeployError> {
        let spec = match source {
            SpecSource::File(path, mode) => load_spec(path, Some(mode)).await?,
            SpecSource::Loaded(spec) => {
                validate(&spec)?;
                spec
            }
        };
        let targets = DeployTarget::resolve(&spec)?;
        Ok((spec, targets))
    }

    async fn bootstrap_trust(&self, targets: &mut [DeployTarget]) -> Result<(), DeployError> {
        let mut trust = TrustBootstrapper::new(Arc::clone(&self.client), self.shells.local());
        if let Some(key) = &self.options.default_key {
            trust = trust.with_default_key(key);
        }

        let mut remote = 0;
        for target in targets.iter_mut().filter(|t| !t.local) {
            remote += 1;
            if !trust.check_trust(&target.params).await {
                if target.params.password.is_none() {
                    return Err(DeployError::TrustError(format!(
                        "{} has no key trust and no password to establish it",
                        target.name
                    )));
                }
                if self.options.dry_run {
                    info!(host = %target.name, "[dry run] would establish key trust");
                    continue;
                }
                if !trust.establish_trust(&target.params).await? {
                    return Err(DeployError::TrustError(format!(
                        "cannot establish key trust with {}",
                        target.name
                    )));
                }
            }
            if target.params.key_path.is_none() {
                target.params.key_path = Some(trust.private_key_path(&target.params));
            }
        }

        if remote == 0 {
            info!("all targets are local, no trust to establish");
        }
        Ok(())
    }

    async fn check_partitions(&self, targets: &[DeployTarget]) -> Result<(), DeployError> {
        for target in targets {
            if !target.local && !self.client.check_connection(&target.params).await {
                return Err(DeployError::RemoteCommandFailure {
                    host: target.name.clone(),
                    detail: "unreachable over SSH".to_string(),
                });
            }

            let Some(disk) = target.enabled_disk() else {
                info!(host = %target.name, "no data disk configured");
                continue;
            };
            let inspector = SafetyInspector::new(self.shells.shell_for(target));

            if !inspector.is_safe_to_use(&disk.device).await {
                return Err(DeployError::SafetyViolation(format!(
                    "{} on {} is operating system storage",
                    disk.device, target.name
                )));
            }

            if self.options.dry_run {
                info!(host = %target.name, device = %disk.device, "[dry run] assuming device exists");
            } else if !inspector.device_exists(&disk.device).await {
                return Err(DeployError::DiskError(format!(
                    "{}: device {} not found",
                    target.name, disk.device
                )));
            }
        }
        Ok(())
    }

    async fn guard_existing(&self, targets: &[DeployTarget]) -> Result<(), DeployError> {
        let mut installed = Vec::new();
        for target in targets {
            let shell = self.shells.shell_for(target);
            if installation_exists(shell.as_ref()).await {
                warn!(host = %target.name, "existing installation found");
                installed.push(target.name.clone());
            }
        }

        info!(
            "{} target(s) already installed, {} clean",
            installed.len(),
            targets.len() - installed.len()
        );
        if installed.is_empty() {
            Ok(())
        } else {
            Err(DeployError::IdempotencyGuardTripped(installed))
        }
    }

    async fn configure_firewall(&self, spec: &DeploymentSpec, targets: &[DeployTarget]) -> Result<(), DeployError> {
        let ports = [spec.server_port(), spec.console_port()];
        for target in targets {
            if self.options.dry_run {
                info!(host = %target.name, "[dry run] would open ports {:?}/tcp", ports);
                continue;
            }
            let manager = NetworkPolicyManager::new(self.shells.shell_for(target));
            if !manager.open_ports(&ports, "tcp", true).await {
                return Err(DeployError::FirewallError(format!(
                    "{}: cannot open ports {:?}",
                    target.name, ports
                )));
            }
        }
        Ok(())
    }

    async fn install(&self, spec: &DeploymentSpec, targets: &[DeployTarget]) -> Result<Vec<InstallOutcome>, DeployError> {
        if self.options.dry_run {
            let dir = spec.minio.install_dir.trim_end_matches('/');
            return Ok(targets
                .iter()
                .map(|target| {
                    info!(host = %target.name, "[dry run] would install binaries into {}", dir);
                    InstallOutcome {
                        server_path: format!("{}/{}", dir, Product::Server.binary_name()),
                        client_path: Some(format!("{}/{}", dir, Product::Client.binary_name())),
                    }
                })
                .collect());
        }

        let local = self.shells.local();
        let settings = spec.minio.clone();
        let jobs: Vec<_> = targets
            .iter()
            .map(|t| (t.name.clone(), self.shells.shell_for(t)))
            .collect();

        let results = fan_out(jobs, self.workers(spec), move |(name, shell)| {
            let installer = BinaryInstaller::new(shell, Arc::clone(&local), settings.clone());
            async move { installer.install().await }.instrument(info_span!("node", node = %name))
        })
        .await;

        collect_nodes(targets, results, DeployError::InstallResolutionExhausted)
    }

    async fn configure_services(&self, spec: &DeploymentSpec, targets: &[DeployTarget]) -> Result<(), DeployError> {
        let shared_volumes = match spec.mode() {
            DeploymentMode::Cluster => Some(cluster_volumes(
                targets.iter().map(|t| (t.address.as_str(), t.data_dir.as_str())),
                spec.server_port(),
                spec.minio.secure,
            )),
            DeploymentMode::Standalone => None,
        };

        for target in targets {
            let request = target.disk_request(spec.minio.min_free_gb);
            let config = UnitConfig {
                install_dir: spec.minio.install_dir.clone(),
                data_dir: target.data_dir.clone(),
                volumes: shared_volumes
                    .clone()
                    .unwrap_or_else(|| target.data_dir.clone()),
                listen_port: spec.server_port(),
                console_port: spec.console_port(),
                credentials: spec.credentials.clone(),
                erasure_coding: spec.erasure_coding().map(str::to_string),
            };
            let generated = generate_unit(&config);

            if self.options.dry_run {
                if let Some(request) = &request {
                    info!(
                        host = %target.name,
                        device = %request.device,
                        "[dry run] would prepare disk at {} (format: {})",
                        request.mount_point,
                        request.format
                    );
                }
                info!(host = %target.name, "[dry run] would write {} with volumes {}", UNIT_PATH, config.volumes);
                continue;
            }

            let shell = self.shells.shell_for(target);
            if let Some(request) = &request {
                SafetyInspector::new(Arc::clone(&shell))
                    .prepare_disk(request)
                    .await?;
            }
            ServiceProvisioner::new(shell)
                .configure(&target.data_dir, &generated)
                .await?;
        }
        Ok(())
    }

    async fn verify_health(
        &self,
        spec: &DeploymentSpec,
        targets: &[DeployTarget],
        installs: &[InstallOutcome],
    ) -> Result<Vec<HealthReport>, DeployError> {
        if self.options.dry_run {
            info!("[dry run] would verify health of {} target(s)", targets.len());
            return Ok(Vec::new());
        }

        // Buckets are cluster-wide, so only the first node provisions them.
        let jobs: Vec<HealthJob> = targets
            .iter()
            .zip(installs)
            .enumerate()
            .map(|(index, (target, install))| HealthJob {
                name: target.name.clone(),
                shell: self.shells.shell_for(target),
                endpoint: ServiceEndpoint {
                    address: target.address.clone(),
                    server_port: spec.server_port(),
                    console_port: spec.console_port(),
                    secure: spec.minio.secure,
                },
                client_path: install.client_path.clone(),
                buckets: if index == 0 {
                    spec.minio.buckets.clone()
                } else {
                    Vec::new()
                },
            })
            .collect();

        let http = self.http.clone();
        let policy = self.options.health_policy;
        let credentials = spec.credentials.clone();

        let results = fan_out(jobs, self.workers(spec), move |job| {
            let HealthJob {
                name,
                shell,
                endpoint,
                client_path,
                buckets,
            } = job;
            let mut verifier = HealthVerifier::new(shell, http.clone(), policy);
            if let Some(path) = client_path {
                verifier = verifier.with_client_path(path);
            }
            let credentials = credentials.clone();
            let span = info_span!("node", node = %name);
            async move {
                let report = verifier
                    .run_comprehensive(&endpoint, &credentials, &buckets)
                    .await?;
                if report.overall_status() {
                    Ok(report)
                } else {
                    Err(DeployError::HealthCheckExhausted(format!(
                        "failed checks: {}",
                        report.failures().join(", ")
                    )))
                }
            }
            .instrument(span)
        })
        .await;

        collect_nodes(targets, results, DeployError::HealthCheckExhausted)
    }
}
