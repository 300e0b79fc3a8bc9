use std::{
    io::{Cursor, Read},
    path::PathBuf,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::lib::{
    orchestrator::types::PipelineError,
    readiness::{poll::Poller, types::PollPolicy},
    tasks::{engine::TaskEngine, types::TaskHandle},
};

/// Where to look for the artifact and where to put it.
#[derive(Debug, Clone)]
pub struct ArtifactLocation {
    pub output_dir: String,
    pub host_destination: PathBuf,
    /// Suffix the browser gives a file while it is still downloading.
    pub partial_suffix: String,
}

/// Waits for a finished file in the task's output directory and copies it
/// to the host, replacing whatever was there. Returns the artifact's name.
pub async fn wait_and_fetch(
    engine: &dyn TaskEngine,
    handle: &TaskHandle,
    location: &ArtifactLocation,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<String, PipelineError> {
    let name = wait_for_completed(engine, handle, location, policy, cancel).await?;

    if tokio::fs::try_exists(&location.host_destination).await? {
        debug!(path = %location.host_destination.display(), "removing previous artifact");
        tokio::fs::remove_file(&location.host_destination).await?;
    }

    let source = format!("{}/{}", location.output_dir.trim_end_matches('/'), name);
    let archive = engine.copy_out(handle, &source).await?;
    let bytes = tokio::task::spawn_blocking(move || sole_member(&archive))
        .await
        .map_err(|e| PipelineError::ArtifactRetrieval(e.to_string()))??;

    tokio::fs::write(&location.host_destination, &bytes).await?;
    info!(
        artifact = %name,
        bytes = bytes.len(),
        destination = %location.host_destination.display(),
        "Artifact fetched"
    );
    Ok(name)
}

async fn wait_for_completed(
    engine: &dyn TaskEngine,
    handle: &TaskHandle,
    location: &ArtifactLocation,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<String, PipelineError> {
    let listing = format!("ls {}", location.output_dir);
    let mut poller = Poller::new(format!("a download in {}", location.output_dir), policy, cancel);

    loop {
        // Fails until the browser has created the directory
        let out = engine.exec(handle, &listing).await?;
        if out.succeeded() {
            if let Some(name) = completed_name(&out.output, &location.partial_suffix) {
                return Ok(name);
            }
        }
        poller.tick().await?;
    }
}

/// First listed name, provided nothing in the listing is still partial.
fn completed_name(listing: &str, partial_suffix: &str) -> Option<String> {
    let names: Vec<&str> = listing.split_whitespace().collect();
    if names.iter().any(|name| name.ends_with(partial_suffix)) {
        return None;
    }
    names.first().map(|name| name.to_string())
}

fn sole_member(archive: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut archive = tar::Archive::new(Cursor::new(archive));
    let mut entries = archive
        .entries()
        .map_err(|e| PipelineError::ArtifactRetrieval(format!("malformed archive: {}", e)))?;

    let mut entry = entries
        .next()
        .ok_or_else(|| PipelineError::ArtifactRetrieval("archive is empty".to_string()))?
        .map_err(|e| PipelineError::ArtifactRetrieval(format!("malformed archive: {}", e)))?;

    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::ArtifactRetrieval(format!("truncated archive: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::{
        tasks::types::{ExecOutput, TaskSpec},
        testing::{FakeEngine, single_file_archive},
    };
    use std::{path::Path, time::Duration};

    fn listing(names: &str) -> ExecOutput {
        ExecOutput {
            exit_code: 0,
            output: names.to_string(),
        }
    }

    fn missing_dir() -> ExecOutput {
        ExecOutput {
            exit_code: 2,
            output: "ls: /home/seluser/Downloads: No such file or directory".to_string(),
        }
    }

    fn location(dir: &Path) -> ArtifactLocation {
        ArtifactLocation {
            output_dir: "/home/seluser/Downloads".to_string(),
            host_destination: dir.join("ignition.img"),
            partial_suffix: ".part".to_string(),
        }
    }

    #[test]
    fn partial_downloads_hold_back_the_listing() {
        assert_eq!(completed_name("ignition.img.part\n", ".part"), None);
        assert_eq!(completed_name("ignition.img ignition.img.part", ".part"), None);
        assert_eq!(completed_name("", ".part"), None);
        assert_eq!(completed_name("ignition.img\n", ".part"), Some("ignition.img".to_string()));
    }

    #[tokio::test]
    async fn never_fetches_before_the_partial_file_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new();
        engine.script_listings(vec![
            missing_dir(),
            listing("x.part"),
            listing("x.part"),
            listing("x.part"),
            listing("x"),
        ]);
        engine.set_archive(single_file_archive("x", b"disk image"));
        let handle = engine.run_task(&TaskSpec::named("ui", "selenium")).await.unwrap();

        let name = wait_and_fetch(
            &engine,
            &handle,
            &location(dir.path()),
            PollPolicy::unbounded(Duration::from_millis(1)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(name, "x");
        assert_eq!(engine.listing_polls(), 5);
        assert_eq!(engine.copied_paths(), vec!["/home/seluser/Downloads/x".to_string()]);
        assert_eq!(std::fs::read(dir.path().join("ignition.img")).unwrap(), b"disk image");
    }

    #[tokio::test]
    async fn replaces_an_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ignition.img"), vec![0u8; 4096]).unwrap();
        let engine = FakeEngine::new();
        engine.script_listings(vec![listing("ignition.img")]);
        engine.set_archive(single_file_archive("ignition.img", b"new"));
        let handle = engine.run_task(&TaskSpec::named("ui", "selenium")).await.unwrap();

        wait_and_fetch(
            &engine,
            &handle,
            &location(dir.path()),
            PollPolicy::unbounded(Duration::from_millis(1)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(dir.path().join("ignition.img")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn empty_archive_is_a_retrieval_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new();
        engine.script_listings(vec![listing("ignition.img")]);
        engine.set_archive(tar::Builder::new(Vec::new()).into_inner().unwrap());
        let handle = engine.run_task(&TaskSpec::named("ui", "selenium")).await.unwrap();

        let err = wait_and_fetch(
            &engine,
            &handle,
            &location(dir.path()),
            PollPolicy::unbounded(Duration::from_millis(1)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::ArtifactRetrieval(_)));
    }

    #[tokio::test]
    async fn a_listing_that_never_settles_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new();
        engine.script_listings(vec![listing("ignition.img.part")]);
        let handle = engine.run_task(&TaskSpec::named("ui", "selenium")).await.unwrap();

        let err = wait_and_fetch(
            &engine,
            &handle,
            &location(dir.path()),
            PollPolicy::bounded(Duration::from_millis(1), Duration::from_millis(15)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::ReadinessTimeout { .. }));
        assert!(engine.copied_paths().is_empty());
    }
}
