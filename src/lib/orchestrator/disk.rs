use std::path::Path;

use tracing::{info, warn};

use super::{
    scope::TaskScope,
    state::Phase,
    types::{Deployer, PipelineError, PipelineResult},
};
use crate::lib::tasks::types::{MountBinding, TaskSpec};

impl Deployer {
    /// Validates the ignition image in the build dir, then copies it onto
    /// `device` with `dd` in a privileged task. Overwrites the device.
    /// An invalid image never reaches the device.
    pub async fn write_disk(&self, device: &Path) -> PipelineResult<()> {
        let outcome = self.validate().await?;
        if !outcome.valid {
            return Err(PipelineError::ValidationFailure(outcome.text));
        }
        info!("Ignition image is valid");

        self.ensure_build_dir().await?;

        let mut scope = TaskScope::new("disk-write");
        let result = self.run_disk_write(&mut scope, device).await;
        self.release(&mut scope).await;

        if result.is_ok() {
            info!(device = %device.display(), "Ignition image written");
        }
        result
    }

    async fn run_disk_write(&self, scope: &mut TaskScope, device: &Path) -> PipelineResult<()> {
        let disk = &self.settings.disk;
        let source = self.container_path(&self.settings.paths.image_path())?;

        self.enter(scope, Phase::Run)?;
        let spec = TaskSpec {
            pull: true,
            privileged: true,
            mounts: vec![
                self.project_mount(),
                MountBinding::bind(device, disk.device_mount.clone()),
            ],
            command: Some(vec![
                "dd".to_string(),
                format!("if={}", source),
                format!("of={}", disk.device_mount),
            ]),
            ..TaskSpec::named("disk-write", disk.image.clone())
        };
        let task = self
            .engine
            .run_task(&spec)
            .await
            .map_err(PipelineError::Provision)?;
        let task = scope.adopt_task(task);

        self.enter(scope, Phase::Act)?;
        let exit_code = self
            .or_cancelled("the disk write to finish", async {
                self.engine.wait(&task).await.map_err(PipelineError::from)
            })
            .await?;
        if exit_code == 0 {
            return Ok(());
        }

        let output = match self.engine.logs(&task).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Could not read disk-write output");
                String::new()
            }
        };
        Err(PipelineError::DiskWrite { exit_code, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::testing::{FakeUi, Harness};

    fn disk_run(harness: &Harness) -> Option<TaskSpec> {
        harness.engine.runs().into_iter().find(|run| run.image == "alpine")
    }

    #[tokio::test]
    async fn writes_the_image_with_dd() {
        let harness = Harness::new(FakeUi::default(), |_| {});

        harness.deployer.write_disk(Path::new("/dev/sdz")).await.unwrap();

        let run = disk_run(&harness).unwrap();
        assert!(run.privileged);
        assert_eq!(run.image, "alpine");
        assert_eq!(
            run.command.clone().unwrap(),
            vec!["dd", "if=/host_cwd/build/ignition.img", "of=/ignition_disk"]
        );
        assert_eq!(run.mounts[1].host_path, Path::new("/dev/sdz"));
        assert_eq!(run.mounts[1].container_path, "/ignition_disk");
        assert_eq!(
            harness.engine.teardown_log(),
            vec![
                "stop task-0".to_string(),
                "rmi validate".to_string(),
                "stop task-1".to_string()
            ]
        );
        harness.engine.assert_released_once();
    }

    #[tokio::test]
    async fn invalid_image_is_never_written() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness
            .engine
            .script_logs("validate", &["error at $.storage: broken\n"]);

        let err = harness
            .deployer
            .write_disk(Path::new("/dev/sdz"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ValidationFailure(ref text) if text == "error at $.storage: broken"));
        assert_eq!(harness.engine.builds().len(), 1);
        assert!(disk_run(&harness).is_none());
        harness.engine.assert_released_once();
    }

    #[tokio::test]
    async fn cancelled_run_never_touches_the_device() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.deployer.cancel.cancel();

        let err = harness
            .deployer
            .write_disk(Path::new("/dev/sdz"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled(_)));
        assert!(harness.engine.runs().is_empty());
        harness.engine.assert_released_once();
    }

    #[tokio::test]
    async fn failed_copy_reports_status_and_output() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.engine.set_exit_code("alpine", 1);
        harness
            .engine
            .script_logs("alpine", &["dd: can't open '/ignition_disk': Permission denied\n"]);

        let err = harness
            .deployer
            .write_disk(Path::new("/dev/sdz"))
            .await
            .unwrap_err();

        match err {
            PipelineError::DiskWrite { exit_code, output } => {
                assert_eq!(exit_code, 1);
                assert!(output.contains("Permission denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
        harness.engine.assert_released_once();
    }
}
