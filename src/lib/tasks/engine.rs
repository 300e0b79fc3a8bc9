use async_trait::async_trait;

use super::types::{EngineError, EngineVersion, ExecOutput, ImageBuildSpec, TaskHandle, TaskSpec};

/// Isolated execution provider the orchestrator drives.
///
/// None of these operations are transactional. `stop` and `remove_image` are
/// best effort: they succeed when the target is already gone and only report
/// other failures.
#[async_trait]
pub trait TaskEngine: Send + Sync {
    async fn engine_version(&self) -> Result<EngineVersion, EngineError>;

    /// Builds `spec` and returns the image reference (its tag).
    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<String, EngineError>;

    async fn run_task(&self, spec: &TaskSpec) -> Result<TaskHandle, EngineError>;

    /// Cumulative output of the task. Every call returns a superset of the
    /// previous call's text.
    async fn logs(&self, handle: &TaskHandle) -> Result<String, EngineError>;

    async fn exec(&self, handle: &TaskHandle, command: &str) -> Result<ExecOutput, EngineError>;

    /// Fetches `path` from the task's filesystem as a tar archive.
    async fn copy_out(&self, handle: &TaskHandle, path: &str) -> Result<Vec<u8>, EngineError>;

    /// Waits for a run-to-completion task to exit and returns its exit code.
    async fn wait(&self, handle: &TaskHandle) -> Result<i64, EngineError>;

    async fn stop(&self, handle: &TaskHandle) -> Result<(), EngineError>;

    async fn remove_image(&self, image: &str) -> Result<(), EngineError>;
}
