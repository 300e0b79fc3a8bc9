use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::state::Phase;
use crate::lib::{
    automation::types::{AutomationError, ControlLocator, SessionConnector},
    config::types::Settings,
    readiness::types::PollError,
    tasks::{engine::TaskEngine, types::EngineError},
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("image build failed: {0}")]
    Build(#[source] EngineError),

    #[error("task failed to start: {0}")]
    Provision(#[source] EngineError),

    #[error("timed out after {waited:?} waiting for {what}")]
    ReadinessTimeout { what: String, waited: Duration },

    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("automation failed: {0}")]
    Automation(#[from] AutomationError),

    #[error("artifact retrieval failed: {0}")]
    ArtifactRetrieval(String),

    #[error("ignition image failed validation:\n{0}")]
    ValidationFailure(String),

    #[error("disk write exited with status {exit_code}: {output}")]
    DiskWrite { exit_code: i64, output: String },

    #[error("task engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("{} is outside the mounted project root", .0.display())]
    OutsideMount(PathBuf),

    #[error("invalid ignition template: {0}")]
    Template(String),

    #[error("{shape} cannot move from {from:?} to {to:?}")]
    PhaseTransition {
        shape: &'static str,
        from: Phase,
        to: Phase,
    },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PollError> for PipelineError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::TimedOut { what, waited } => PipelineError::ReadinessTimeout { what, waited },
            PollError::Cancelled { what } => PipelineError::Cancelled(what),
        }
    }
}

/// Runs the three task shapes against one engine. Each shape owns the tasks
/// and images it creates and releases them before returning.
pub struct Deployer {
    pub engine: Arc<dyn TaskEngine>,
    pub connector: Arc<dyn SessionConnector>,
    pub locator: Arc<dyn ControlLocator>,
    pub settings: Settings,
    pub cancel: CancellationToken,
    /// Image tags are fixed per shape, so builds must not overlap.
    pub(super) build_lock: Mutex<()>,
}

pub type PipelineResult<T> = Result<T, PipelineError>;
