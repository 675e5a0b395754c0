// ABOUTME: Resolved, immutable runtime configuration consumed by the orchestrator
// Built once by `Config::resolve` and never mutated afterwards

use crate::executor::Elevation;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DOCKER_COMMAND: &str = "docker";
pub const DEFAULT_COMPOSE_COMMAND: &str = "docker compose";
pub const DEFAULT_WORKING_DIR: &str = "/tmp/dev-binaries";
pub const DEFAULT_DEBUGGER_PORT: u16 = 2345;
pub const DEFAULT_LOG_TAIL: u32 = 50;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENTRY_SCRIPT_NAME: &str = "entry.sh";
pub const INIT_SCRIPT_NAME: &str = "init.sh";
pub const DEBUGGER_BINARY_NAME: &str = "dlv";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub component: ComponentRuntime,
    pub host: HostRuntime,
    pub target: TargetMode,
}

/// How the target service container is found and controlled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMode {
    /// A compose service, stopped and started through the compose tool in `compose_dir`.
    Compose { compose_dir: String },
    /// A plain container named after the service, stopped and started through the engine.
    Adopt,
}

#[derive(Debug, Clone)]
pub struct HostRuntime {
    pub name: String,
    pub mode: HostMode,
    /// Directory on the host where the binary and scripts are placed.
    pub working_dir: String,
    pub elevation: Elevation,
    pub docker_command: String,
    pub compose_command: String,
}

#[derive(Debug, Clone)]
pub enum HostMode {
    Local,
    Remote(SshTarget),
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub host_key: HostKeyPolicy,
    pub connect_timeout: Duration,
}

/// Server identity verification for the SSH transport.
///
/// Accepting any key is the default for trusted development networks. Pin a
/// fingerprint with `host_key_fingerprint` to harden it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    #[default]
    AcceptAny,
    Fingerprint(String),
}

#[derive(Debug, Clone)]
pub struct ComponentRuntime {
    pub name: String,
    pub local_binary: PathBuf,
    pub target_service: String,
    pub container_binary_path: String,
    pub debugger: DebuggerSettings,
    pub extra_ports: Vec<u16>,
    pub initial_scripts: String,
    pub log_file: Option<PathBuf>,
    pub log_tail: u32,
    pub debounce: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerSettings {
    pub enabled: bool,
    pub port: u16,
    pub args: Vec<String>,
    pub local_path: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn dev_container_name(&self) -> String {
        format!("{}-dev", self.component.target_service)
    }

    /// Where the developer's binary lands on the host.
    pub fn remote_binary_path(&self) -> String {
        let name = self
            .component
            .local_binary
            .file_name()
            .map_or_else(|| "app".to_string(), |n| n.to_string_lossy().into_owned());
        self.in_working_dir(&name)
    }

    pub fn remote_debugger_path(&self) -> String {
        self.in_working_dir(DEBUGGER_BINARY_NAME)
    }

    pub fn remote_entry_script_path(&self) -> String {
        self.in_working_dir(ENTRY_SCRIPT_NAME)
    }

    pub fn remote_init_script_path(&self) -> String {
        self.in_working_dir(INIT_SCRIPT_NAME)
    }

    fn in_working_dir(&self, name: &str) -> String {
        format!("{}/{}", self.host.working_dir.trim_end_matches('/'), name)
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}
