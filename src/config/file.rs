// ABOUTME: On-disk TOML layout for hosts, components, projects and global defaults
// Everything here is optional at parse time; resolution fills gaps and validates

use serde::Deserialize;
use std::collections::BTreeMap;

/// Parsed configuration file, before any selection or merging.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub hosts: BTreeMap<String, HostEntry>,
    pub components: BTreeMap<String, ComponentEntry>,
    pub projects: BTreeMap<String, ProjectEntry>,
}

/// `[defaults]`: lowest configured layer, applied beneath host and component values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub use_sudo: Option<bool>,
    pub sudo_password: Option<String>,
    pub docker_command: Option<String>,
    pub compose_command: Option<String>,
    pub working_dir: Option<String>,
    pub debugger_port: Option<u16>,
    pub log_tail: Option<u32>,
    pub log_file: Option<String>,
    pub debounce_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Local,
    #[default]
    Remote,
}

/// `[hosts.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostEntry {
    pub mode: HostKind,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<String>,
    pub key_passphrase: Option<String>,
    /// SHA-256 fingerprint to pin. Absent means any host key is accepted.
    pub host_key_fingerprint: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub use_sudo: Option<bool>,
    pub sudo_password: Option<String>,
    pub docker_command: Option<String>,
    pub compose_command: Option<String>,
    pub working_dir: Option<String>,
}

impl HostEntry {
    pub fn local() -> Self {
        Self {
            mode: HostKind::Local,
            ..Default::default()
        }
    }
}

/// `[components.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComponentEntry {
    pub local_binary: Option<String>,
    pub target_service: Option<String>,
    pub container_binary_path: Option<String>,
    pub extra_ports: Vec<u16>,
    pub initial_scripts: Option<String>,
    pub log_file: Option<String>,
    pub log_tail: Option<u32>,
    pub debugger: DebuggerEntry,
}

/// `[components.<name>.debugger]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DebuggerEntry {
    pub enabled: bool,
    pub port: Option<u16>,
    /// Extra arguments passed to the program, whitespace separated.
    pub args: Option<String>,
    pub local_path: Option<String>,
}

/// `[projects.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectEntry {
    /// Owning host. Omitted means the project lives on a local-mode host.
    pub host: Option<String>,
    pub compose_dir: Option<String>,
    pub adopt_existing: bool,
}
