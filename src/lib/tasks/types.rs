use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use bollard::Docker;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountBinding {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl MountBinding {
    pub fn bind(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        MountBinding {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// Network namespace a task runs in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkSharing {
    #[default]
    None,
    /// Join the network namespace of an already running task, by task id.
    JoinTask(String),
}

impl NetworkSharing {
    pub fn network_mode(&self) -> Option<String> {
        match self {
            NetworkSharing::None => None,
            NetworkSharing::JoinTask(id) => Some(format!("container:{}", id)),
        }
    }
}

/// Everything the engine needs to start one task. Tasks always run detached.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub name: String,
    pub image: String,
    pub pull: bool,
    pub auto_remove: bool,
    pub ports: Vec<PortMapping>,
    pub mounts: Vec<MountBinding>,
    pub network: NetworkSharing,
    pub privileged: bool,
    pub command: Option<Vec<String>>,
}

impl TaskSpec {
    /// Task names are unique per run so a leaked task never blocks the next one.
    pub fn named(prefix: &str, image: impl Into<String>) -> Self {
        TaskSpec {
            name: format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            image: image.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        EngineVersion {
            major,
            minor,
            patch,
        }
    }

    /// Parses `major.minor.patch`, ignoring anything after the leading digits
    /// of each component (`20.10.24+dfsg1` is `20.10.24`).
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split('.').map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });

        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(EngineVersion::new(major, minor, patch))
    }

    /// Engines from 9.3 on no longer create the builder's user group for us,
    /// so the converter must be built from the patched dockerfile.
    pub fn needs_patched_dockerfile(&self) -> bool {
        self.major > 9 || (self.major == 9 && self.minor >= 3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerfileRule {
    Fixed(PathBuf),
    VersionGated { default: PathBuf, patched: PathBuf },
}

impl DockerfileRule {
    pub fn select(&self, version: &EngineVersion) -> &Path {
        match self {
            DockerfileRule::Fixed(path) => path,
            DockerfileRule::VersionGated { default, patched } => {
                if version.needs_patched_dockerfile() {
                    patched
                } else {
                    default
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageBuildSpec {
    pub context: PathBuf,
    /// Relative paths are resolved inside the build context.
    pub dockerfile: DockerfileRule,
    pub tag: String,
    pub build_args: HashMap<String, String>,
    pub network_mode: Option<String>,
    pub pull: bool,
    pub quiet: bool,
    pub remove_intermediate: bool,
}

/// Cumulative task output. Only ever grows: a fetch shorter than what was
/// already seen (the task went away, the engine truncated) leaves it intact.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<String>>,
}

impl LogBuffer {
    pub fn merge(&self, fetched: String) -> String {
        let mut current = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if fetched.len() >= current.len() {
            *current = fetched;
        }
        current.clone()
    }
}

#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: String,
    pub name: String,
    pub image: String,
    pub logs: LogBuffer,
}

impl TaskHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        TaskHandle {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            logs: LogBuffer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("docker client error: {0}")]
    Client(String),

    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
}
