use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use super::types::EngineError;

/// Brings the checkout at `dir` up to date with `branch` of `repository`,
/// cloning it when the directory is missing or empty.
pub async fn sync_checkout(repository: &str, branch: &str, dir: &Path) -> Result<(), EngineError> {
    if needs_clone(dir).await? {
        info!(repository, branch, dir = %dir.display(), "Cloning build source");
        let mut clone = Command::new("git");
        clone
            .arg("clone")
            .arg("--branch")
            .arg(branch)
            .arg(repository)
            .arg(dir);
        return run_git(clone).await;
    }

    info!(dir = %dir.display(), "Updating build source");
    let mut fetch = Command::new("git");
    fetch.arg("-C").arg(dir).args(["fetch", "origin"]);
    run_git(fetch).await?;

    let mut pull = Command::new("git");
    pull.arg("-C").arg(dir).args(["pull", "origin", branch]);
    run_git(pull).await
}

async fn needs_clone(dir: &Path) -> Result<bool, EngineError> {
    if !tokio::fs::try_exists(dir).await? {
        return Ok(true);
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}

// Dropped when the run is cancelled, so git must not outlive it
async fn run_git(mut command: Command) -> Result<(), EngineError> {
    let output = command.kill_on_drop(true).output().await?;
    debug!(
        stdout = %String::from_utf8_lossy(&output.stdout),
        stderr = %String::from_utf8_lossy(&output.stderr),
        "git finished"
    );
    if output.status.success() {
        Ok(())
    } else {
        Err(EngineError::Build(format!(
            "git exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
