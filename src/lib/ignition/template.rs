use std::{net::IpAddr, path::Path};

use serde::Serialize;
use serde_json::{Value, json};

use crate::lib::orchestrator::types::PipelineError;

/// Per-node values layered onto the configuration template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub hostname: String,
    pub password: String,
    pub switch_ip: IpAddr,
    pub switch_port: u16,
    pub swarm_token: String,
}

impl NodeSettings {
    /// The JSON the node's join script reads on first boot.
    /// Keys keep their order, separated by `", "` and `": "`.
    pub fn swarm_config(&self) -> String {
        let fields = [
            ("SWITCH_IP_ADDRESS", Value::from(self.switch_ip.to_string())),
            ("SWITCH_PORT", Value::from(self.switch_port)),
            ("SWARM_TOKEN", Value::from(self.swarm_token.as_str())),
        ];
        let body = fields
            .iter()
            .map(|(key, value)| format!("{}: {}", Value::from(*key), value))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", body)
    }
}

/// Files shipped alongside the template that make a node join the swarm.
#[derive(Debug, Clone)]
pub struct SwarmUnit {
    pub script: String,
    pub service: String,
}

pub async fn load_template(template_dir: &Path) -> Result<Value, PipelineError> {
    let raw = tokio::fs::read_to_string(template_dir.join("fuelignition.json")).await?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn load_swarm_unit(template_dir: &Path) -> Result<SwarmUnit, PipelineError> {
    Ok(SwarmUnit {
        script: tokio::fs::read_to_string(template_dir.join("join_swarm.sh")).await?,
        service: tokio::fs::read_to_string(template_dir.join("join_swarm.service")).await?,
    })
}

pub fn apply_settings(
    template: &Value,
    node: &NodeSettings,
    unit: &SwarmUnit,
) -> Result<Value, PipelineError> {
    let mut config = template.clone();
    let root = config
        .as_object_mut()
        .ok_or_else(|| PipelineError::Template("template is not a JSON object".to_string()))?;
    root.insert("hostname".to_string(), Value::String(node.hostname.clone()));

    let user = config
        .pointer_mut("/login/users/0")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| PipelineError::Template("template has no login user".to_string()))?;
    user.insert("passwd".to_string(), Value::String(node.password.clone()));

    let files = array_at(&mut config, "storage", "files")?;
    files.push(data_file("/root/join_swarm.json", &node.swarm_config()));
    files.push(data_file("/root/join_swarm.sh", &unit.script));

    let units = array_at(&mut config, "systemd", "units")?;
    units.push(json!({
        "name": "join_swarm.service",
        "enabled": true,
        "contents": unit.service,
    }));

    Ok(config)
}

fn data_file(path: &str, content: &str) -> Value {
    json!({
        "path": path,
        "source_type": "data",
        "mode": 420,
        "overwrite": true,
        "data_content": content,
    })
}

/// `config[section][key]`, created as an empty array when missing.
fn array_at<'a>(
    config: &'a mut Value,
    section: &str,
    key: &str,
) -> Result<&'a mut Vec<Value>, PipelineError> {
    config
        .as_object_mut()
        .and_then(|root| {
            root.entry(section)
                .or_insert_with(|| json!({}))
                .as_object_mut()
        })
        .and_then(|section| section.entry(key).or_insert_with(|| json!([])).as_array_mut())
        .ok_or_else(|| PipelineError::Template(format!("{}.{} is not an array", section, key)))
}

/// Four-space indented JSON, byte-stable for identical input.
pub fn render(config: &Value) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    config.serialize(&mut serializer)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeSettings {
        NodeSettings {
            hostname: "test_hostname".to_string(),
            password: String::new(),
            switch_ip: "192.168.1.1".parse().unwrap(),
            switch_port: 42,
            swarm_token: "SWMTKN-1-TEST".to_string(),
        }
    }

    fn unit() -> SwarmUnit {
        SwarmUnit {
            script: "#!/bin/sh\necho join\n".to_string(),
            service: "[Unit]\nDescription=Join swarm\n".to_string(),
        }
    }

    #[test]
    fn applies_node_settings_to_the_template() {
        let template = json!({
            "hostname": "",
            "login": { "users": [{ "name": "root", "passwd": "", "human_read": "" }] },
            "storage": { "files": [{ "path": "/etc/motd" }] },
        });

        let config = apply_settings(&template, &node(), &unit()).unwrap();

        assert_eq!(config["hostname"], "test_hostname");
        assert_eq!(config["login"]["users"][0]["passwd"], "");
        let files = config["storage"]["files"].as_array().unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[1]["path"], "/root/join_swarm.json");
        assert_eq!(
            files[1]["data_content"],
            r#"{"SWITCH_IP_ADDRESS": "192.168.1.1", "SWITCH_PORT": 42, "SWARM_TOKEN": "SWMTKN-1-TEST"}"#
        );
        assert_eq!(files[2]["mode"], 420);
        assert_eq!(config["systemd"]["units"][0]["name"], "join_swarm.service");
        assert_eq!(config["systemd"]["units"][0]["enabled"], true);
        assert_eq!(template["hostname"], "");
    }

    #[test]
    fn template_without_a_login_user_is_rejected() {
        let template = json!({ "login": { "users": [] } });
        assert!(matches!(
            apply_settings(&template, &node(), &unit()),
            Err(PipelineError::Template(_))
        ));
    }

    #[test]
    fn renders_with_four_space_indent() {
        let rendered = render(&json!({ "a": [1] })).unwrap();
        assert_eq!(
            String::from_utf8(rendered).unwrap(),
            "{\n    \"a\": [\n        1\n    ]\n}"
        );
    }
}
