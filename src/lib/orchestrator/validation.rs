use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::{
    scope::TaskScope,
    state::Phase,
    types::{Deployer, PipelineError, PipelineResult},
};
use crate::lib::{
    tasks::types::{DockerfileRule, ImageBuildSpec, TaskSpec},
    validation::filter::ValidationOutcome,
};

impl Deployer {
    /// Checks the ignition image in the build dir with the validator image.
    /// An invalid image is a normal outcome, not an error.
    pub async fn validate(&self) -> PipelineResult<ValidationOutcome> {
        let _build = self.build_lock.lock().await;
        self.ensure_build_dir().await?;

        let mut scope = TaskScope::new("validation");
        let result = self.run_validation(&mut scope).await;
        self.release(&mut scope).await;

        if let Ok(outcome) = &result {
            info!(valid = outcome.valid, "Validation finished");
        }
        result
    }

    async fn run_validation(&self, scope: &mut TaskScope) -> PipelineResult<ValidationOutcome> {
        let paths = &self.settings.paths;
        let validation = &self.settings.validation;
        let benign = glob::Pattern::new(&validation.benign_warning)?;

        self.enter(scope, Phase::Build)?;
        let build = ImageBuildSpec {
            context: paths.dockerfile_dir.clone(),
            dockerfile: DockerfileRule::Fixed(validation.dockerfile.clone()),
            tag: validation.tag.clone(),
            build_args: HashMap::from([
                ("CWD_MOUNTDIR".to_string(), paths.container_mount_dir.clone()),
                ("BUILD_DIR".to_string(), self.project_relative(&paths.build_dir)?),
            ]),
            network_mode: None,
            pull: true,
            quiet: true,
            remove_intermediate: self.settings.cleanup.images,
        };
        let image = self
            .or_cancelled("the validator image to build", async {
                self.engine.build_image(&build).await.map_err(PipelineError::Build)
            })
            .await?;
        if self.settings.cleanup.images {
            scope.adopt_image(image.clone());
        }

        self.enter(scope, Phase::Run)?;
        let spec = TaskSpec {
            mounts: vec![self.project_mount().read_only()],
            ..TaskSpec::named("validate", image)
        };
        let task = self
            .engine
            .run_task(&spec)
            .await
            .map_err(PipelineError::Provision)?;
        let task = scope.adopt_task(task);

        self.enter(scope, Phase::Act)?;
        let exit_code = self
            .or_cancelled("the validator to finish", async {
                self.engine.wait(&task).await.map_err(PipelineError::from)
            })
            .await?;
        self.enter(scope, Phase::Collect)?;
        let response = self.engine.logs(&task).await?;
        debug!(exit_code, response = %response, "validator finished");
        if exit_code != 0 {
            warn!(exit_code, "Validator exited with a failure status");
        }

        Ok(ValidationOutcome::from_response(&response, &benign))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::testing::{FakeUi, Harness};

    const BENIGN: &str = "warning at $.login.users.0, line 1 col 1092: Unused key human_read";

    #[tokio::test]
    async fn benign_warnings_only_is_valid() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness
            .engine
            .script_logs("validate", &[&format!("{}\n{}\n", BENIGN, BENIGN)]);

        let outcome = harness.deployer.validate().await.unwrap();

        assert_eq!(
            outcome,
            ValidationOutcome {
                valid: true,
                text: String::new()
            }
        );
        assert_eq!(
            harness.engine.teardown_log(),
            vec!["stop task-0".to_string(), "rmi validate".to_string()]
        );
        harness.engine.assert_released_once();
    }

    #[tokio::test]
    async fn real_errors_are_reported() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.engine.script_logs(
            "validate",
            &[&format!("{}\nerror at $.systemd.units.0: unit has no name\n", BENIGN)],
        );
        harness.engine.set_exit_code("validate", 1);

        let outcome = harness.deployer.validate().await.unwrap();

        assert!(!outcome.valid);
        assert_eq!(outcome.text, "error at $.systemd.units.0: unit has no name");
        harness.engine.assert_released_once();
    }

    #[tokio::test]
    async fn validator_sees_the_build_dir_through_a_read_only_mount() {
        let harness = Harness::new(FakeUi::default(), |_| {});

        harness.deployer.validate().await.unwrap();

        let build = &harness.engine.builds()[0];
        assert_eq!(build.context, harness.path("dockerfiles"));
        assert_eq!(build.build_args["CWD_MOUNTDIR"], "/host_cwd");
        assert_eq!(build.build_args["BUILD_DIR"], "build");
        let run = &harness.engine.runs()[0];
        assert!(run.mounts[0].read_only);
        assert!(run.command.is_none());
    }

    #[tokio::test]
    async fn build_failure_starts_nothing() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.engine.fail_build("validate");

        let err = harness.deployer.validate().await.unwrap_err();

        assert!(matches!(err, PipelineError::Build(_)));
        assert!(harness.engine.runs().is_empty());
        assert!(harness.engine.teardown_log().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_builds_nothing() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.deployer.cancel.cancel();

        let err = harness.deployer.validate().await.unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled(_)));
        assert!(harness.engine.builds().is_empty());
        assert!(harness.engine.teardown_log().is_empty());
    }

    #[tokio::test]
    async fn task_is_removed_even_when_images_are_kept() {
        let harness = Harness::new(FakeUi::default(), |settings| {
            settings.cleanup.images = false;
        });

        harness.deployer.validate().await.unwrap();

        assert_eq!(harness.engine.teardown_log(), vec!["stop task-0".to_string()]);
        harness.engine.assert_released_once();
    }
}
