use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use super::{
    scope::TaskScope,
    state::Phase,
    types::{Deployer, PipelineError, PipelineResult},
};
use crate::lib::{
    artifact::extractor::{ArtifactLocation, wait_and_fetch},
    automation::{
        driver::{ConversionPlan, drive_conversion},
        types::RemoteSession,
    },
    readiness::{detector::wait_ready, types::ReadinessPattern},
    tasks::{
        source::sync_checkout,
        types::{DockerfileRule, ImageBuildSpec, NetworkSharing, PortMapping, TaskHandle, TaskSpec},
    },
};

impl Deployer {
    /// Converts the configuration document at `json_path` into an ignition
    /// image at `img_path` using the fuel-ignition web UI.
    pub async fn json_to_img(&self, json_path: &Path, img_path: &Path) -> PipelineResult<PathBuf> {
        let _build = self.build_lock.lock().await;
        self.ensure_build_dir().await?;

        let mut scope = TaskScope::new("conversion");
        let result = self.convert(&mut scope, json_path, img_path).await;
        let reached = self.release(&mut scope).await;

        match &result {
            Ok(path) => info!(image = %path.display(), "Ignition image created"),
            Err(e) => warn!(error = %e, phase = ?reached, "Conversion failed"),
        }
        result
    }

    async fn convert(
        &self,
        scope: &mut TaskScope,
        json_path: &Path,
        img_path: &Path,
    ) -> PipelineResult<PathBuf> {
        let conversion = &self.settings.conversion;
        let cleanup = self.settings.cleanup.images;
        let document = self.container_path(json_path)?;
        let converter_ready = ReadinessPattern::last_line_glob(&conversion.converter_ready_glob)?;

        self.enter(scope, Phase::Run)?;
        let ui_spec = self.ui_task_spec();
        let ui = self
            .engine
            .run_task(&ui_spec)
            .await
            .map_err(PipelineError::Provision)?;
        if cleanup {
            scope.adopt_image(ui_spec.image.clone());
        }
        let ui = scope.adopt_task(ui);
        info!(task = %ui.name, "UI host started");

        self.enter(scope, Phase::Build)?;
        let build = self.converter_build_spec();
        let image = self
            .or_cancelled("the converter image to build", async {
                if let Some(repository) = &conversion.repository {
                    sync_checkout(repository, &conversion.branch, &build.context)
                        .await
                        .map_err(PipelineError::Build)?;
                }
                self.engine.build_image(&build).await.map_err(PipelineError::Build)
            })
            .await?;
        if cleanup {
            scope.adopt_image(image.clone());
        }

        self.enter(scope, Phase::Run)?;
        let converter_spec = TaskSpec {
            auto_remove: true,
            network: NetworkSharing::JoinTask(ui.id.clone()),
            ..TaskSpec::named(&conversion.tag, image)
        };
        let converter = self
            .engine
            .run_task(&converter_spec)
            .await
            .map_err(PipelineError::Provision)?;
        let converter = scope.adopt_task(converter);
        info!(task = %converter.name, "Converter started");

        self.enter(scope, Phase::WaitReady)?;
        let policy = self.settings.polling.readiness();
        let selenium_ready = ReadinessPattern::substring(conversion.selenium_ready.clone());
        wait_ready(self.engine.as_ref(), &ui, &selenium_ready, policy, &self.cancel).await?;
        wait_ready(self.engine.as_ref(), &converter, &converter_ready, policy, &self.cancel).await?;

        self.enter(scope, Phase::Act)?;
        let session = self.connector.connect().await?;
        let fetched = self.drive_and_fetch(scope, session.as_ref(), &ui, document, img_path).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close browser session");
        }
        fetched?;

        Ok(img_path.to_path_buf())
    }

    async fn drive_and_fetch(
        &self,
        scope: &mut TaskScope,
        session: &dyn RemoteSession,
        ui: &TaskHandle,
        document: String,
        img_path: &Path,
    ) -> PipelineResult<()> {
        let conversion = &self.settings.conversion;
        let plan = ConversionPlan {
            url: conversion.tool_url.clone(),
            input_name: conversion.input_name.clone(),
            document,
            download_dir: conversion.download_dir.clone(),
            ui_wait: self.settings.polling.ui(),
        };
        drive_conversion(
            session,
            self.locator.as_ref(),
            self.engine.as_ref(),
            ui,
            &plan,
            &self.cancel,
        )
        .await?;

        self.enter(scope, Phase::Collect)?;
        let location = ArtifactLocation {
            output_dir: conversion.download_dir.clone(),
            host_destination: img_path.to_path_buf(),
            partial_suffix: conversion.partial_suffix.clone(),
        };
        wait_and_fetch(
            self.engine.as_ref(),
            ui,
            &location,
            self.settings.polling.artifact(),
            &self.cancel,
        )
        .await?;
        Ok(())
    }

    fn ui_task_spec(&self) -> TaskSpec {
        let conversion = &self.settings.conversion;
        TaskSpec {
            pull: true,
            auto_remove: true,
            ports: vec![
                PortMapping {
                    container_port: conversion.webdriver_port,
                    host_port: conversion.webdriver_port,
                },
                PortMapping {
                    container_port: conversion.vnc_port,
                    host_port: conversion.vnc_port,
                },
            ],
            mounts: vec![self.project_mount()],
            ..TaskSpec::named("selenium", conversion.selenium_image.clone())
        }
    }

    fn converter_build_spec(&self) -> ImageBuildSpec {
        let paths = &self.settings.paths;
        let conversion = &self.settings.conversion;
        ImageBuildSpec {
            context: paths.build_dir.join(&conversion.source_dir),
            dockerfile: DockerfileRule::VersionGated {
                default: conversion.default_dockerfile.clone(),
                patched: paths.dockerfile_dir.join(&conversion.patched_dockerfile),
            },
            tag: conversion.tag.clone(),
            build_args: HashMap::from([(
                "CONTAINER_USERID".to_string(),
                conversion.container_user_id.clone(),
            )]),
            network_mode: conversion.build_network.clone(),
            pull: true,
            quiet: true,
            remove_intermediate: self.settings.cleanup.images,
        }
    }
}
