// ABOUTME: Turns a container snapshot into the create command for its dev replacement
// Also renders the entry and init scripts mounted into the dev container

use super::snapshot::ContainerSnapshot;
use std::collections::BTreeMap;

pub const OWNERSHIP_LABEL_KEY: &str = "dev-swap";
pub const OWNERSHIP_LABEL_VALUE: &str = "true";
pub const COMPOSE_LABEL_PREFIX: &str = "com.docker.compose";

pub const CONTAINER_ENTRY_SCRIPT: &str = "/dev-swap/entry.sh";
pub const CONTAINER_INIT_SCRIPT: &str = "/dev-swap/init.sh";
pub const CONTAINER_DEBUGGER: &str = "/dev-swap/dlv";

/// Host-side paths of the files placed for the dev container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevArtifacts {
    pub binary: String,
    pub entry_script: String,
    pub init_script: String,
    /// Uploaded debugger, if one was found locally.
    pub debugger: Option<String>,
}

/// Debugger settings for the entry script when debugging is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerLaunch {
    pub port: u16,
    pub args: Vec<String>,
}

/// Everything needed to create the dev container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub publish: Vec<u16>,
    pub networks: Vec<String>,
    pub working_dir: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl RunSpec {
    pub fn build(
        snapshot: &ContainerSnapshot,
        name: &str,
        container_binary_path: &str,
        artifacts: &DevArtifacts,
        publish: Vec<u16>,
    ) -> Self {
        let mut volumes = snapshot.volumes.clone();
        volumes.push(format!("{}:{}", artifacts.binary, container_binary_path));
        volumes.push(format!("{}:{}", artifacts.entry_script, CONTAINER_ENTRY_SCRIPT));
        volumes.push(format!("{}:{}", artifacts.init_script, CONTAINER_INIT_SCRIPT));
        if let Some(debugger) = &artifacts.debugger {
            volumes.push(format!("{debugger}:{CONTAINER_DEBUGGER}"));
        }

        // Compose labels would make the compose tool treat this container as its own
        let mut labels: BTreeMap<String, String> = snapshot
            .labels
            .iter()
            .filter(|(key, _)| !key.starts_with(COMPOSE_LABEL_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.insert(
            OWNERSHIP_LABEL_KEY.to_string(),
            OWNERSHIP_LABEL_VALUE.to_string(),
        );

        let mut publish = publish;
        publish.sort_unstable();
        publish.dedup();

        Self {
            name: name.to_string(),
            image: snapshot.image.clone(),
            env: snapshot.env.clone(),
            volumes,
            publish,
            networks: snapshot.networks.clone(),
            working_dir: Some(snapshot.working_dir.clone()).filter(|w| !w.is_empty()),
            labels,
        }
    }

    /// Arguments for `<engine> create`. Only the first network is attached here.
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string(), "--name".to_string(), self.name.clone()];

        for env in &self.env {
            args.push("-e".to_string());
            args.push(env.clone());
        }
        for volume in &self.volumes {
            args.push("-v".to_string());
            args.push(volume.clone());
        }
        for port in &self.publish {
            args.push("-p".to_string());
            args.push(format!("{port}:{port}"));
        }
        if let Some(network) = self.networks.first() {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        if let Some(dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        for (key, value) in &self.labels {
            args.push("-l".to_string());
            args.push(format!("{key}={value}"));
        }

        // An image ENTRYPOINT would otherwise receive the init script as an argument
        args.push("--entrypoint".to_string());
        args.push("sh".to_string());
        args.push(self.image.clone());
        args.push(CONTAINER_INIT_SCRIPT.to_string());
        args
    }

    /// Networks joined after creation with `network connect`.
    pub fn additional_networks(&self) -> &[String] {
        self.networks.get(1..).unwrap_or_default()
    }
}

/// Script that replaces the shell with the binary, optionally under the debugger.
pub fn entry_script(
    container_binary_path: &str,
    debugger: Option<&DebuggerLaunch>,
    debugger_mounted: bool,
) -> String {
    match debugger {
        None => format!("exec {container_binary_path}\n"),
        Some(launch) => {
            let dlv = if debugger_mounted {
                CONTAINER_DEBUGGER
            } else {
                "dlv"
            };
            // --continue starts the program without waiting for a client to attach
            let mut line = format!(
                "exec {dlv} exec {container_binary_path} --headless --listen=:{} --api-version=2 --accept-multiclient --continue",
                launch.port
            );
            if !launch.args.is_empty() {
                line.push(' ');
                line.push_str(&launch.args.join(" "));
            }
            line.push('\n');
            line
        }
    }
}

/// Container command: the configured setup lines, then the entry script.
pub fn init_script(initial_scripts: &str) -> String {
    let setup = initial_scripts.trim_end();
    if setup.is_empty() {
        format!("exec sh {CONTAINER_ENTRY_SCRIPT}\n")
    } else {
        format!("{setup}\nexec sh {CONTAINER_ENTRY_SCRIPT}\n")
    }
}
