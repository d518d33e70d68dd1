//! Finite state machine enforcing the fixed stage order

use std::fmt;

use serde::Serialize;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prerequisites,
    LoadConfig,
    SshTrust,
    OsPartitionCheck,
    ExistingInstallGuard,
    Firewall,
    Install,
    ServiceConfig,
    HealthCheck,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Prerequisites,
        Stage::LoadConfig,
        Stage::SshTrust,
        Stage::OsPartitionCheck,
        Stage::ExistingInstallGuard,
        Stage::Firewall,
        Stage::Install,
        Stage::ServiceConfig,
        Stage::HealthCheck,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Prerequisites => "prerequisites",
            Stage::LoadConfig => "load_config",
            Stage::SshTrust => "ssh_trust",
            Stage::OsPartitionCheck => "os_partition_check",
            Stage::ExistingInstallGuard => "existing_install_guard",
            Stage::Firewall => "firewall",
            Stage::Install => "install",
            Stage::ServiceConfig => "service_config",
            Stage::HealthCheck => "health_check",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        let index = Stage::ALL.iter().position(|s| s == self)?;
        Stage::ALL.get(index + 1).copied()
    }

    /// Stages skipped when service provisioning is disabled
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Stage::Install | Stage::ServiceConfig | Stage::HealthCheck)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing has run yet
    Pending,

    Running(Stage),

    /// The stage finished and the next one may begin
    Passed(Stage),

    /// Terminal: a stage failed
    Failed { stage: Stage, error: String },

    /// Terminal: every stage ran, or the provisioning stages were elided
    Completed,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Begin(Stage),
    Succeed(Stage),
    Fail(Stage, String),

    /// Skip the provisioning stages after the firewall
    Elide,

    /// All stages done
    Finish,
}

/// Pipeline FSM. Stages can only begin in order, and a failure is final.
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    state: PipelineState,
    results: Vec<StageResult>,
    elided: bool,
}

impl PipelineFsm {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Pending,
            results: Vec::new(),
            elided: false,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn elided(&self) -> bool {
        self.elided
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PipelineState::Failed { .. } | PipelineState::Completed)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (PipelineState::Pending, PipelineEvent::Begin(Stage::Prerequisites)) => {
                PipelineState::Running(Stage::Prerequisites)
            }
            (PipelineState::Passed(prev), PipelineEvent::Begin(stage)) if prev.next() == Some(*stage) => {
                PipelineState::Running(*stage)
            }

            (PipelineState::Running(current), PipelineEvent::Succeed(stage)) if current == stage => {
                self.results.push(StageResult {
                    stage: *stage,
                    success: true,
                    detail: String::new(),
                });
                PipelineState::Passed(*stage)
            }
            (PipelineState::Running(current), PipelineEvent::Fail(stage, error)) if current == stage => {
                self.results.push(StageResult {
                    stage: *stage,
                    success: false,
                    detail: error.clone(),
                });
                PipelineState::Failed {
                    stage: *stage,
                    error: error.clone(),
                }
            }

            (PipelineState::Passed(Stage::Firewall), PipelineEvent::Elide) => {
                self.elided = true;
                PipelineState::Completed
            }
            (PipelineState::Passed(Stage::HealthCheck), PipelineEvent::Finish) => PipelineState::Completed,

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
