use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::types::{ConfigError, Settings};

impl Settings {
    /// Loads `labels` from the config file, later labels overriding earlier
    /// ones key by key. Relative paths resolve against the file's directory.
    pub fn from_file(path: &Path, labels: &[String]) -> Result<Self, ConfigError> {
        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let base = std::path::absolute(base)?;

        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content, labels)?
        } else {
            warn!(path = %path.display(), "No configuration file, using defaults");
            Settings::default()
        };

        settings.resolve_paths(&base);
        Ok(settings)
    }

    pub fn from_toml(content: &str, labels: &[String]) -> Result<Self, ConfigError> {
        let mut tables = content.parse::<toml::Table>()?;
        if tables.is_empty() {
            debug!("configuration file is empty, using defaults");
            return Ok(Settings::default());
        }

        let mut merged = toml::Table::new();
        for label in labels {
            debug!(label = %label, "applying configuration label");
            match tables.remove(label) {
                Some(toml::Value::Table(table)) => merge(&mut merged, table),
                Some(_) => {
                    return Err(ConfigError::Validation(format!(
                        "[{}] must be a table",
                        label
                    )));
                }
                None => return Err(ConfigError::MissingLabel(label.clone())),
            }
        }

        let settings: Settings = toml::Value::Table(merged).try_into()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for pattern in [
            &self.conversion.converter_ready_glob,
            &self.validation.benign_warning,
        ] {
            glob::Pattern::new(pattern)
                .map_err(|e| ConfigError::Validation(format!("{:?}: {}", pattern, e)))?;
        }
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "polling.interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Anchors the project root at `base` and the other directories at the project root.
    pub fn resolve_paths(&mut self, base: &Path) {
        let paths = &mut self.paths;
        paths.project_root = anchor(base, &paths.project_root);
        let root = paths.project_root.clone();
        for dir in [
            &mut paths.build_dir,
            &mut paths.dockerfile_dir,
            &mut paths.template_dir,
        ] {
            *dir = anchor(&root, dir);
        }
    }
}

// `components()` drops interior `.` so mount sources stay clean
fn anchor(base: &Path, path: &Path) -> PathBuf {
    base.join(path).components().collect()
}

fn merge(into: &mut toml::Table, from: toml::Table) {
    for (key, value) in from {
        match (into.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(overlay)) => {
                merge(existing, overlay)
            }
            (_, value) => {
                into.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[default]
cleanup = { images = true }

[default.conversion]
tool_url = "https://opensuse.github.io/fuel-ignition/edit"
repository = "https://github.com/openSUSE/fuel-ignition.git"

[default.polling]
interval_ms = 100

[test.cleanup]
images = false

[test.polling]
readiness_timeout_secs = 120
"#;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn later_labels_override_key_by_key() {
        let settings = Settings::from_toml(CONFIG, &labels(&["default", "test"])).unwrap();

        assert!(!settings.cleanup.images);
        assert_eq!(settings.polling.interval_ms, 100);
        assert_eq!(settings.polling.readiness_timeout_secs, Some(120));
        assert_eq!(
            settings.conversion.tool_url,
            "https://opensuse.github.io/fuel-ignition/edit"
        );
        assert_eq!(settings.conversion.locator.ordinal, 9);
    }

    #[test]
    fn defaults_wait_indefinitely() {
        let settings = Settings::from_toml(CONFIG, &labels(&["default"])).unwrap();
        assert_eq!(settings.polling.readiness().timeout, None);
        assert_eq!(settings.polling.artifact().timeout, None);
        assert!(settings.polling.ui().timeout.is_some());
    }

    #[test]
    fn unknown_labels_and_keys_are_rejected() {
        assert!(matches!(
            Settings::from_toml(CONFIG, &labels(&["default", "cli"])),
            Err(ConfigError::MissingLabel(label)) if label == "cli"
        ));
        assert!(matches!(
            Settings::from_toml("[default]\ncleanup_images = true\n", &labels(&["default"])),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::from_toml("# nothing here\n", &labels(&["default", "cli"])).unwrap();

        assert!(settings.cleanup.images);
        assert_eq!(settings.conversion.locator.ordinal, 9);
        assert_eq!(settings.polling.readiness().timeout, None);
    }

    #[test]
    fn invalid_globs_fail_validation() {
        let content = "[default.conversion]\nconverter_ready_glob = \"[unclosed\"\n";
        assert!(matches!(
            Settings::from_toml(content, &labels(&["default"])),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn relative_paths_resolve_under_the_project_root() {
        let mut settings = Settings::default();
        settings.resolve_paths(Path::new("/srv/deployer"));

        assert_eq!(
            settings.paths.project_root.to_str(),
            Some("/srv/deployer")
        );
        assert_eq!(
            settings.paths.image_path().to_str(),
            Some("/srv/deployer/build/ignition.img")
        );
    }
}
