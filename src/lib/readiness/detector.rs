use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    poll::Poller,
    types::{PollPolicy, ReadinessPattern},
};
use crate::lib::{
    orchestrator::types::PipelineError,
    tasks::{engine::TaskEngine, types::TaskHandle},
};

/// Blocks until the task's cumulative logs satisfy `pattern`.
pub async fn wait_ready(
    engine: &dyn TaskEngine,
    handle: &TaskHandle,
    pattern: &ReadinessPattern,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    let mut poller = Poller::new(format!("{} to become ready", handle.name), policy, cancel);

    loop {
        let logs = engine.logs(handle).await?;
        if pattern.matches(&logs) {
            info!(
                task = %handle.name,
                attempts = poller.attempts(),
                elapsed = ?poller.elapsed(),
                "Task ready"
            );
            return Ok(());
        }
        debug!(task = %handle.name, "not ready yet");
        poller.tick().await?;
    }
}
