use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    scope::TaskScope,
    state::Phase,
    types::{Deployer, PipelineError, PipelineResult},
};
use crate::lib::{
    automation::{
        types::{ControlLocator, OrdinalControlLocator, SessionConnector},
        webdriver::WebDriverConnector,
    },
    config::types::Settings,
    ignition::template::{NodeSettings, apply_settings, load_swarm_unit, load_template, render},
    tasks::{
        engine::TaskEngine,
        types::{DockerClient, EngineError, MountBinding},
    },
};

impl Deployer {
    pub fn new(
        engine: Arc<dyn TaskEngine>,
        connector: Arc<dyn SessionConnector>,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Self {
        let locator = OrdinalControlLocator::from(&settings.conversion.locator);
        Deployer {
            engine,
            connector,
            locator: Arc::new(locator),
            settings,
            cancel,
            build_lock: Mutex::new(()),
        }
    }

    /// A deployer backed by the local Docker daemon and a WebDriver endpoint.
    pub fn connect(settings: Settings, cancel: CancellationToken) -> Result<Self, EngineError> {
        let engine = DockerClient::new()?;
        let conversion = &settings.conversion;
        let connector = WebDriverConnector {
            endpoint: conversion.webdriver_url.clone(),
            browser: conversion.browser.clone(),
            implicit_wait: Duration::from_secs(conversion.implicit_wait_secs),
        };
        Ok(Deployer::new(
            Arc::new(engine),
            Arc::new(connector),
            settings,
            cancel,
        ))
    }

    pub fn with_locator(mut self, locator: Arc<dyn ControlLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub(super) async fn ensure_build_dir(&self) -> PipelineResult<()> {
        tokio::fs::create_dir_all(&self.settings.paths.build_dir).await?;
        Ok(())
    }

    /// The project root, bound where every task expects it.
    pub(super) fn project_mount(&self) -> MountBinding {
        let paths = &self.settings.paths;
        MountBinding::bind(&paths.project_root, paths.container_mount_dir.clone())
    }

    /// Where a host path under the project root appears inside a task.
    pub fn container_path(&self, host: &Path) -> PipelineResult<String> {
        let paths = &self.settings.paths;
        let absolute = normalize(&std::path::absolute(host)?);
        let relative = absolute
            .strip_prefix(&paths.project_root)
            .map_err(|_| PipelineError::OutsideMount(host.to_path_buf()))?;

        let mount = paths.container_mount_dir.trim_end_matches('/');
        if relative.as_os_str().is_empty() {
            return Ok(mount.to_string());
        }
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!("{}/{}", mount, relative))
    }

    /// Like `container_path`, relative to the project root.
    pub(super) fn project_relative(&self, host: &Path) -> PipelineResult<String> {
        let inside = self.container_path(host)?;
        let mount = self.settings.paths.container_mount_dir.trim_end_matches('/');
        Ok(inside
            .strip_prefix(mount)
            .unwrap_or(&inside)
            .trim_start_matches('/')
            .to_string())
    }

    /// Moves `scope` to `next`, unless the run has been cancelled.
    pub(super) fn enter(&self, scope: &mut TaskScope, next: Phase) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(format!(
                "the {} {:?} step",
                scope.shape(),
                next
            )));
        }
        scope.enter(next)
    }

    /// Awaits `work`, giving up as soon as the run is cancelled.
    pub(super) async fn or_cancelled<T>(
        &self,
        what: &str,
        work: impl Future<Output = PipelineResult<T>>,
    ) -> PipelineResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled(what.to_string())),
            result = work => result,
        }
    }

    /// Unwinds `scope` and returns the phase it had reached before teardown.
    pub(super) async fn release(&self, scope: &mut TaskScope) -> Phase {
        let reached = scope.phase();
        let failures = scope.unwind(self.engine.as_ref()).await;
        if !failures.is_empty() {
            warn!(failures = failures.len(), "Teardown finished with failures");
        }
        reached
    }

    /// Renders the node's configuration into the build dir and converts it
    /// into an ignition image at `img_path`.
    pub async fn create_img(&self, node: &NodeSettings, img_path: &Path) -> PipelineResult<PathBuf> {
        self.ensure_build_dir().await?;
        let paths = &self.settings.paths;

        let template = load_template(&paths.template_dir).await?;
        let unit = load_swarm_unit(&paths.template_dir).await?;
        let config = apply_settings(&template, node, &unit)?;

        let document = paths.document_path();
        tokio::fs::write(&document, render(&config)?).await?;
        info!(hostname = %node.hostname, document = %document.display(), "Configuration written");

        self.json_to_img(&document, img_path).await
    }

    /// Creates, validates and writes an ignition image to `device`.
    /// Nothing touches the device unless validation passes.
    pub async fn create_ignition_disk(&self, device: &Path, node: &NodeSettings) -> PipelineResult<()> {
        let image = self.settings.paths.image_path();
        self.create_img(node, &image).await?;
        self.write_disk(device).await
    }
}

// Collapses `.` and `..` lexically; the path need not exist yet
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::{
        tasks::types::ExecOutput,
        testing::{FIXTURE_IMAGE, FakeUi, Harness},
    };
    use std::net::Ipv4Addr;

    fn node() -> NodeSettings {
        NodeSettings {
            hostname: "node-07".to_string(),
            password: "$6$salt$hash".to_string(),
            switch_ip: Ipv4Addr::new(10, 0, 0, 1).into(),
            switch_port: 2377,
            swarm_token: "SWMTKN-1-abc".to_string(),
        }
    }

    #[test]
    fn maps_project_paths_into_the_mount() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        let deployer = &harness.deployer;

        assert_eq!(
            deployer
                .container_path(&harness.path("build/fuelignition.json"))
                .unwrap(),
            "/host_cwd/build/fuelignition.json"
        );
        assert_eq!(deployer.container_path(harness.root.path()).unwrap(), "/host_cwd");
        assert_eq!(
            deployer.project_relative(&harness.path("build")).unwrap(),
            "build"
        );
        assert!(matches!(
            deployer.container_path(Path::new("/definitely/elsewhere.json")),
            Err(PipelineError::OutsideMount(_))
        ));
    }

    #[test]
    fn parent_components_are_collapsed_before_mapping() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        let deployer = &harness.deployer;

        assert_eq!(
            deployer
                .container_path(&harness.path("build/../templates/./fuelignition.json"))
                .unwrap(),
            "/host_cwd/templates/fuelignition.json"
        );
        assert!(matches!(
            deployer.container_path(&harness.path("../outside.json")),
            Err(PipelineError::OutsideMount(_))
        ));
    }

    #[tokio::test]
    async fn release_reports_the_phase_that_was_reached() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        let deployer = &harness.deployer;
        let mut scope = TaskScope::new("conversion");
        deployer.enter(&mut scope, Phase::Run).unwrap();
        deployer.enter(&mut scope, Phase::WaitReady).unwrap();

        assert_eq!(deployer.release(&mut scope).await, Phase::WaitReady);
        assert_eq!(scope.phase(), Phase::Teardown);
    }

    #[tokio::test]
    async fn creates_validates_and_writes_a_disk() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.script_conversion(FIXTURE_IMAGE);
        harness.engine.script_logs(
            "validate",
            &["warning at $.login.users.0, line 12 col 5: Unused key human_read\n"],
        );

        harness
            .deployer
            .create_ignition_disk(Path::new("/dev/sdz"), &node())
            .await
            .unwrap();

        let image = tokio::fs::read(harness.path("build/ignition.img")).await.unwrap();
        assert_eq!(image, FIXTURE_IMAGE);

        let document = tokio::fs::read_to_string(harness.path("build/fuelignition.json"))
            .await
            .unwrap();
        let document: serde_json::Value = serde_json::from_str(&document).unwrap();
        assert_eq!(document["hostname"], "node-07");
        assert_eq!(document["login"]["users"][0]["passwd"], "$6$salt$hash");

        assert!(
            harness
                .connector
                .events()
                .contains(&"keys load_from /host_cwd/build/fuelignition.json".to_string())
        );
        let runs = harness.engine.runs();
        assert_eq!(runs.last().unwrap().image, "alpine");
        harness.engine.assert_released_once();
    }

    #[tokio::test]
    async fn invalid_image_never_reaches_the_device() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.script_conversion(FIXTURE_IMAGE);
        harness.engine.script_logs(
            "validate",
            &["error at $.storage.files.0: invalid mode\nwarning at $.login.users.0: Unused key human_read"],
        );

        let err = harness
            .deployer
            .create_ignition_disk(Path::new("/dev/sdz"), &node())
            .await
            .unwrap_err();

        match err {
            PipelineError::ValidationFailure(text) => {
                assert_eq!(text, "error at $.storage.files.0: invalid mode")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(harness.engine.runs().iter().all(|run| run.image != "alpine"));
        harness.engine.assert_released_once();
    }

    #[tokio::test]
    async fn failed_conversion_skips_validation() {
        let harness = Harness::new(FakeUi::default(), |_| {});
        harness.script_conversion(FIXTURE_IMAGE);
        harness.engine.script_listings(vec![ExecOutput {
            exit_code: 0,
            output: "ignition.img\n".to_string(),
        }]);
        harness.engine.set_archive(Vec::new());

        let err = harness
            .deployer
            .create_ignition_disk(Path::new("/dev/sdz"), &node())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ArtifactRetrieval(_)));
        assert!(harness.engine.builds().iter().all(|b| b.tag != "validate"));
        harness.engine.assert_released_once();
    }
}
