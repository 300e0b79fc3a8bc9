use tracing::{debug, warn};

use super::{
    state::{Phase, valid_phase_transition},
    types::PipelineError,
};
use crate::lib::tasks::{
    engine::TaskEngine,
    types::{EngineError, TaskHandle},
};

#[derive(Debug)]
enum Release {
    Task(TaskHandle),
    Image(String),
}

/// Tracks one shape invocation: its phase and everything it must release.
/// Releases run last-acquired first, each exactly once.
#[derive(Debug)]
pub struct TaskScope {
    shape: &'static str,
    phase: Phase,
    releases: Vec<Release>,
}

impl TaskScope {
    pub fn new(shape: &'static str) -> Self {
        TaskScope {
            shape,
            phase: Phase::Pending,
            releases: Vec::new(),
        }
    }

    pub fn shape(&self) -> &'static str {
        self.shape
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn enter(&mut self, next: Phase) -> Result<(), PipelineError> {
        if !valid_phase_transition(&self.phase, &next) {
            return Err(PipelineError::PhaseTransition {
                shape: self.shape,
                from: self.phase,
                to: next,
            });
        }
        debug!(shape = self.shape, from = ?self.phase, to = ?next, "phase");
        self.phase = next;
        Ok(())
    }

    /// Registers a started task and hands back a handle for this invocation to use.
    pub fn adopt_task(&mut self, handle: TaskHandle) -> TaskHandle {
        self.releases.push(Release::Task(handle.clone()));
        handle
    }

    pub fn adopt_image(&mut self, image: impl Into<String>) {
        self.releases.push(Release::Image(image.into()));
    }

    /// Releases everything adopted so far. Failures are logged and returned,
    /// never raised, so they cannot mask the error that ended the shape.
    pub async fn unwind(&mut self, engine: &dyn TaskEngine) -> Vec<EngineError> {
        self.phase = Phase::Teardown;
        let mut failures = Vec::new();

        while let Some(release) = self.releases.pop() {
            let result = match &release {
                Release::Task(handle) => engine.stop(handle).await,
                Release::Image(image) => engine.remove_image(image).await,
            };
            if let Err(e) = result {
                warn!(shape = self.shape, release = ?release, error = %e, "Teardown step failed");
                failures.push(e);
            }
        }

        failures
    }
}
