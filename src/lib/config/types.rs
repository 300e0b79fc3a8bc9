use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::lib::{
    automation::types::OrdinalControlLocator, readiness::types::PollPolicy,
    validation::filter::UNUSED_HUMAN_READABLE_KEY,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub paths: PathSettings,
    pub cleanup: CleanupSettings,
    pub polling: PollSettings,
    pub conversion: ConversionSettings,
    pub validation: ValidationSettings,
    pub disk: DiskSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    /// Mounted into the UI, validation and disk tasks.
    pub project_root: PathBuf,
    pub build_dir: PathBuf,
    pub dockerfile_dir: PathBuf,
    pub template_dir: PathBuf,
    /// Where `project_root` appears inside tasks.
    pub container_mount_dir: String,
    pub document_name: String,
    pub image_name: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        PathSettings {
            project_root: PathBuf::from("."),
            build_dir: PathBuf::from("build"),
            dockerfile_dir: PathBuf::from("dockerfiles"),
            template_dir: PathBuf::from("templates"),
            container_mount_dir: "/host_cwd".to_string(),
            document_name: "fuelignition.json".to_string(),
            image_name: "ignition.img".to_string(),
        }
    }
}

impl PathSettings {
    pub fn document_path(&self) -> PathBuf {
        self.build_dir.join(&self.document_name)
    }

    pub fn image_path(&self) -> PathBuf {
        self.build_dir.join(&self.image_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupSettings {
    /// Remove pulled and built images once a shape is done with them.
    pub images: bool,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        CleanupSettings { images: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSettings {
    pub interval_ms: u64,
    /// Unset waits for readiness sentinels indefinitely.
    pub readiness_timeout_secs: Option<u64>,
    /// Unset waits for the download indefinitely.
    pub artifact_timeout_secs: Option<u64>,
    pub ui_wait_secs: u64,
    pub ui_poll_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval_ms: 100,
            readiness_timeout_secs: None,
            artifact_timeout_secs: None,
            ui_wait_secs: 10,
            ui_poll_ms: 500,
        }
    }
}

impl PollSettings {
    fn policy(&self, timeout_secs: Option<u64>) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.interval_ms),
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn readiness(&self) -> PollPolicy {
        self.policy(self.readiness_timeout_secs)
    }

    pub fn artifact(&self) -> PollPolicy {
        self.policy(self.artifact_timeout_secs)
    }

    pub fn ui(&self) -> PollPolicy {
        PollPolicy::bounded(
            Duration::from_millis(self.ui_poll_ms),
            Duration::from_secs(self.ui_wait_secs),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionSettings {
    pub selenium_image: String,
    pub webdriver_port: u16,
    pub vnc_port: u16,
    pub webdriver_url: String,
    pub browser: String,
    pub implicit_wait_secs: u64,
    pub tool_url: String,
    pub selenium_ready: String,
    pub converter_ready_glob: String,
    /// Unset skips synchronizing the converter checkout.
    pub repository: Option<String>,
    pub branch: String,
    /// Converter checkout, relative to the build dir.
    pub source_dir: PathBuf,
    pub tag: String,
    /// Relative to the converter checkout.
    pub default_dockerfile: PathBuf,
    /// Relative to the dockerfile dir.
    pub patched_dockerfile: PathBuf,
    pub container_user_id: String,
    pub build_network: Option<String>,
    pub input_name: String,
    pub download_dir: String,
    pub partial_suffix: String,
    pub locator: LocatorSettings,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        ConversionSettings {
            selenium_image: "selenium/standalone-firefox:latest".to_string(),
            webdriver_port: 4444,
            vnc_port: 7900,
            webdriver_url: "http://127.0.0.1:4444".to_string(),
            browser: "firefox".to_string(),
            implicit_wait_secs: 10,
            tool_url: "http://localhost:3000/fuel-ignition/edit".to_string(),
            selenium_ready: "INFO [Standalone.execute] - Started Selenium Standalone".to_string(),
            converter_ready_glob: "*Local:*http://*".to_string(),
            repository: Some("https://github.com/openSUSE/fuel-ignition.git".to_string()),
            branch: "main".to_string(),
            source_dir: PathBuf::from("fuel-ignition"),
            tag: "fuel-ignition".to_string(),
            default_dockerfile: PathBuf::from("Dockerfile"),
            patched_dockerfile: PathBuf::from("fuel-ignition.dockerfile"),
            container_user_id: "1000".to_string(),
            build_network: Some("host".to_string()),
            input_name: "load_from".to_string(),
            download_dir: "/home/seluser/Downloads".to_string(),
            partial_suffix: ".part".to_string(),
            locator: LocatorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocatorSettings {
    pub region_id: String,
    pub group_tag: String,
    pub ordinal: usize,
    pub control_tag: String,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        let locator = OrdinalControlLocator::default();
        LocatorSettings {
            region_id: locator.region_id,
            group_tag: locator.group_tag,
            ordinal: locator.ordinal,
            control_tag: locator.control_tag,
        }
    }
}

impl From<&LocatorSettings> for OrdinalControlLocator {
    fn from(settings: &LocatorSettings) -> Self {
        OrdinalControlLocator {
            region_id: settings.region_id.clone(),
            group_tag: settings.group_tag.clone(),
            ordinal: settings.ordinal,
            control_tag: settings.control_tag.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSettings {
    /// Relative to the dockerfile dir.
    pub dockerfile: PathBuf,
    pub tag: String,
    pub benign_warning: String,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        ValidationSettings {
            dockerfile: PathBuf::from("validate.dockerfile"),
            tag: "validate".to_string(),
            benign_warning: UNUSED_HUMAN_READABLE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskSettings {
    pub image: String,
    /// Where the target device is bound inside the disk-write task.
    pub device_mount: String,
}

impl Default for DiskSettings {
    fn default() -> Self {
        DiskSettings {
            image: "alpine".to_string(),
            device_mount: "/ignition_disk".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("configuration has no [{0}] table")]
    MissingLabel(String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
