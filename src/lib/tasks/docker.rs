use super::{
    build::pack_build_context,
    engine::TaskEngine,
    types::{
        DockerClient, EngineError, EngineVersion, ExecOutput, ImageBuildSpec, TaskHandle, TaskSpec,
    },
};
use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, KillContainerOptions,
        LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::{BuildImageOptions, CreateImageOptions, RemoveImageOptions},
    models::{HostConfig, Mount, MountTypeEnum, PortBinding},
};
use futures_util::stream::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::{debug, info, warn};

impl DockerClient {
    pub fn new() -> Result<Self, EngineError> {
        let docker_client = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Client(e.to_string()))?;

        Ok(DockerClient {
            client: docker_client,
        })
    }

    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        info!(image, "Pulling image");

        let stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        futures_util::pin_mut!(stream);

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                debug!(image, status = %status, "pull progress");
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }

    fn container_config(spec: &TaskSpec) -> Config<String> {
        // Port bindings
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .ports
            .iter()
            .map(|port| {
                (
                    format!("{}/tcp", port.container_port),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(port.host_port.to_string()),
                    }]),
                )
            })
            .collect();

        // Mounts
        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|mount| Mount {
                target: Some(mount.container_path.clone()),
                source: Some(mount.host_path.to_string_lossy().into_owned()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(mount.read_only),
                ..Default::default()
            })
            .collect();

        // Host Config
        let host_config = HostConfig {
            auto_remove: Some(spec.auto_remove),
            privileged: Some(spec.privileged),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            mounts: (!mounts.is_empty()).then_some(mounts),
            network_mode: spec.network.network_mode(),
            ..Default::default()
        };

        // Container Config
        Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            exposed_ports: (!spec.ports.is_empty()).then(|| {
                spec.ports
                    .iter()
                    .map(|port| (format!("{}/tcp", port.container_port), HashMap::new()))
                    .collect()
            }),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn swallow_missing(result: Result<(), bollard::errors::Error>) -> Result<(), EngineError> {
        match result {
            Ok(()) => Ok(()),
            // 404: already gone, 409: not running or removal already in progress
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 409,
                message,
            }) => {
                debug!(message = %message, "target already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TaskEngine for DockerClient {
    async fn engine_version(&self) -> Result<EngineVersion, EngineError> {
        let version = self.client.version().await?;

        let raw = version
            .components
            .unwrap_or_default()
            .into_iter()
            .find(|component| component.name == "Engine")
            .map(|component| component.version)
            .or(version.version)
            .ok_or_else(|| EngineError::Client("engine did not report a version".to_string()))?;

        EngineVersion::parse(&raw)
            .ok_or_else(|| EngineError::Client(format!("unparseable engine version {:?}", raw)))
    }

    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<String, EngineError> {
        let version = self.engine_version().await?;
        let dockerfile = spec.dockerfile.select(&version).to_path_buf();
        info!(
            tag = %spec.tag,
            context = %spec.context.display(),
            dockerfile = %dockerfile.display(),
            engine = ?version,
            "Building image"
        );

        let context = spec.context.clone();
        let packed = tokio::task::spawn_blocking(move || pack_build_context(&context, &dockerfile))
            .await
            .map_err(|e| EngineError::Build(format!("packing build context: {}", e)))??;

        let options = BuildImageOptions {
            dockerfile: packed.dockerfile,
            t: spec.tag.clone(),
            buildargs: spec.build_args.clone(),
            networkmode: spec.network_mode.clone().unwrap_or_default(),
            pull: spec.pull,
            q: spec.quiet,
            rm: spec.remove_intermediate,
            forcerm: spec.remove_intermediate,
            ..Default::default()
        };

        let stream = self
            .client
            .build_image(options, None, Some(packed.archive.into()));
        futures_util::pin_mut!(stream);

        while let Some(msg) = stream.next().await {
            let info = msg.map_err(|e| EngineError::Build(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(EngineError::Build(error));
            }
            if let Some(line) = info.stream {
                debug!(tag = %spec.tag, "{}", line.trim_end());
            }
        }

        info!(tag = %spec.tag, "Image built");
        Ok(spec.tag.clone())
    }

    async fn run_task(&self, spec: &TaskSpec) -> Result<TaskHandle, EngineError> {
        if spec.pull {
            self.pull(&spec.image).await?;
        }

        // Container creation options
        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        });

        let resp = self
            .client
            .create_container(options, Self::container_config(spec))
            .await?;
        info!(container = %resp.id, image = %spec.image, "Container created");

        if let Err(e) = self
            .client
            .start_container(&resp.id, None::<StartContainerOptions<String>>)
            .await
        {
            // A created but unstarted container is not handed to the caller, so clean it here.
            warn!(container = %resp.id, error = %e, "Container failed to start");
            let _ = self
                .client
                .remove_container(
                    &resp.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(e.into());
        }

        info!(container = %resp.id, name = %spec.name, "Container started");
        Ok(TaskHandle::new(resp.id, spec.name.clone(), spec.image.clone()))
    }

    async fn logs(&self, handle: &TaskHandle) -> Result<String, EngineError> {
        let chunks: Vec<_> = self
            .client
            .logs(
                &handle.id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    tail: "all".to_string(),
                    ..Default::default()
                }),
            )
            .try_collect()
            .await?;

        let fetched: String = chunks
            .into_iter()
            .map(|chunk| String::from_utf8_lossy(&chunk.into_bytes()).into_owned())
            .collect();

        Ok(handle.logs.merge(fetched))
    }

    async fn exec(&self, handle: &TaskHandle, command: &str) -> Result<ExecOutput, EngineError> {
        let exec = self
            .client
            .create_exec(
                &handle.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut output = String::new();
        match self.client.start_exec(&exec.id, None).await? {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    output.push_str(&String::from_utf8_lossy(&chunk?.into_bytes()));
                }
            }
            StartExecResults::Detached => {
                return Err(EngineError::Exec(format!("{:?} started detached", command)));
            }
        }

        let exit_code = self
            .client
            .inspect_exec(&exec.id)
            .await?
            .exit_code
            .ok_or_else(|| EngineError::Exec(format!("{:?} reported no exit code", command)))?;

        debug!(container = %handle.id, command, exit_code, "exec finished");
        Ok(ExecOutput { exit_code, output })
    }

    async fn copy_out(&self, handle: &TaskHandle, path: &str) -> Result<Vec<u8>, EngineError> {
        let chunks: Vec<_> = self
            .client
            .download_from_container(
                &handle.id,
                Some(DownloadFromContainerOptions {
                    path: path.to_string(),
                }),
            )
            .try_collect()
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => EngineError::NotFound(path.to_string()),
                e => e.into(),
            })?;

        Ok(chunks.into_iter().flat_map(|chunk| chunk.to_vec()).collect())
    }

    async fn wait(&self, handle: &TaskHandle) -> Result<i64, EngineError> {
        let stream = self
            .client
            .wait_container(&handle.id, None::<WaitContainerOptions<String>>);
        futures_util::pin_mut!(stream);

        match stream.next().await {
            Some(Ok(resp)) => Ok(resp.status_code),
            // Non-zero exits arrive as errors from the wait endpoint
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(EngineError::NotFound(handle.id.clone())),
        }
    }

    async fn stop(&self, handle: &TaskHandle) -> Result<(), EngineError> {
        info!(container = %handle.id, "Stopping container");
        Self::swallow_missing(
            self.client
                .kill_container(&handle.id, None::<KillContainerOptions<String>>)
                .await,
        )?;

        Self::swallow_missing(
            self.client
                .remove_container(
                    &handle.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await,
        )?;

        info!(container = %handle.id, "Container stopped and removed");
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        info!(image, "Removing image");
        let result = self
            .client
            .remove_image(
                image,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map(|_| ());
        Self::swallow_missing(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::tasks::types::{MountBinding, NetworkSharing, PortMapping};

    #[test]
    fn container_config_carries_ports_mounts_and_network() {
        let spec = TaskSpec {
            name: "selenium-1".to_string(),
            image: "selenium/standalone-firefox:latest".to_string(),
            auto_remove: true,
            ports: vec![PortMapping {
                container_port: 4444,
                host_port: 4444,
            }],
            mounts: vec![MountBinding::bind("/srv/project", "/host_cwd").read_only()],
            network: NetworkSharing::JoinTask("abc123".to_string()),
            privileged: true,
            command: Some(vec!["dd".to_string()]),
            ..Default::default()
        };

        let config = DockerClient::container_config(&spec);
        let host = config.host_config.unwrap();

        assert_eq!(host.network_mode.as_deref(), Some("container:abc123"));
        assert_eq!(host.privileged, Some(true));
        assert_eq!(host.auto_remove, Some(true));
        let bindings = host.port_bindings.unwrap();
        assert_eq!(
            bindings["4444/tcp"].as_ref().unwrap()[0].host_port.as_deref(),
            Some("4444")
        );
        let mount = &host.mounts.unwrap()[0];
        assert_eq!(mount.target.as_deref(), Some("/host_cwd"));
        assert_eq!(mount.read_only, Some(true));
        assert!(config.exposed_ports.unwrap().contains_key("4444/tcp"));
        assert_eq!(config.cmd, Some(vec!["dd".to_string()]));
    }

    #[test]
    fn tasks_without_ports_or_mounts_leave_them_unset() {
        let spec = TaskSpec::named("disk", "alpine");
        let config = DockerClient::container_config(&spec);
        let host = config.host_config.unwrap();
        assert!(host.port_bindings.is_none());
        assert!(host.mounts.is_none());
        assert!(host.network_mode.is_none());
        assert!(config.exposed_ports.is_none());
    }
}
