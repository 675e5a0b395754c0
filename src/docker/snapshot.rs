// ABOUTME: Captures the configuration of a running service container from engine inspect output
// The snapshot is the template the dev container is built from

use super::ContainerError;
use bollard::models::{ContainerConfig, PortMap};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Configuration of the original container, captured right before it is stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub id: String,
    pub service: String,
    pub image: String,
    pub env: Vec<String>,
    /// Bind and volume mounts in `source:destination[:ro]` form.
    pub volumes: Vec<String>,
    /// Published ports in `host:container/proto` form.
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub working_dir: String,
    pub labels: BTreeMap<String, String>,
}

// Only the parts of `inspect` we use; everything else is ignored
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDocument {
    #[serde(default)]
    id: String,
    #[serde(default)]
    config: Option<ContainerConfig>,
    #[serde(default)]
    host_config: Option<InspectHostConfig>,
    #[serde(default)]
    mounts: Option<Vec<InspectMount>>,
    #[serde(default)]
    network_settings: Option<InspectNetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    port_bindings: Option<PortMap>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(default, rename = "Type")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
    #[serde(default, rename = "RW")]
    rw: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    networks: Option<HashMap<String, serde_json::Value>>,
}

impl ContainerSnapshot {
    /// Parse `<engine> inspect <id>` output for the container backing `service`.
    pub fn from_inspect(service: &str, output: &str) -> Result<Self, ContainerError> {
        let documents = parse_documents(output)?;
        let document = documents
            .into_iter()
            .next()
            .ok_or_else(|| {
                ContainerError::InspectParse("inspect returned no containers".to_string())
            })?;

        let config = document.config.unwrap_or_default();
        let image = config.image.unwrap_or_default();
        if image.is_empty() {
            return Err(ContainerError::InspectParse(
                "inspect output has no Config.Image".to_string(),
            ));
        }

        let volumes = document
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter(|m| !m.destination.is_empty())
            .map(|m| {
                let source = match (m.kind.as_deref(), m.name.as_deref()) {
                    (Some("volume"), Some(name)) if !name.is_empty() => name.to_string(),
                    _ => m.source,
                };
                let mut volume = format!("{}:{}", source, m.destination);
                if m.rw == Some(false) {
                    volume.push_str(":ro");
                }
                volume
            })
            .collect();

        let mut ports: Vec<String> = document
            .host_config
            .and_then(|h| h.port_bindings)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(container_port, bindings)| {
                bindings
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|b| b.host_port.filter(|p| !p.is_empty()))
                    .map(move |host_port| format!("{host_port}:{container_port}"))
            })
            .collect();
        ports.sort();

        let mut networks: Vec<String> = document
            .network_settings
            .and_then(|n| n.networks)
            .map(|n| n.into_keys().collect())
            .unwrap_or_default();
        networks.sort();

        Ok(Self {
            id: document.id,
            service: service.to_string(),
            image,
            env: config.env.unwrap_or_default(),
            volumes,
            ports,
            networks,
            entrypoint: config.entrypoint.unwrap_or_default(),
            command: config.cmd.unwrap_or_default(),
            working_dir: config.working_dir.unwrap_or_default(),
            labels: config.labels.unwrap_or_default().into_iter().collect(),
        })
    }
}

/// Find the inspect array in `output`, skipping any sudo or shell noise around it.
///
/// Noise such as `[sudo] password for ...` can itself start with `[`, so every
/// opening bracket is tried until one parses.
fn parse_documents(output: &str) -> Result<Vec<InspectDocument>, ContainerError> {
    let mut last_error = None;
    for (start, _) in output.match_indices('[') {
        let mut values = serde_json::Deserializer::from_str(&output[start..])
            .into_iter::<Vec<InspectDocument>>();
        match values.next() {
            Some(Ok(documents)) => return Ok(documents),
            Some(Err(e)) => last_error = Some(e.to_string()),
            None => {}
        }
    }
    Err(ContainerError::InspectParse(last_error.unwrap_or_else(|| {
        "inspect output is empty or not a JSON array".to_string()
    })))
}
