//! Deployment orchestration

pub mod engine;
pub mod fanout;
pub mod pipeline;
pub mod target;

pub use engine::{EngineOptions, OrchestrationEngine, RunSummary, ShellProvider, SystemShells};
pub use fanout::fan_out;
pub use pipeline::{PipelineEvent, PipelineFsm, PipelineState, Stage, StageResult};
pub use target::DeployTarget;
