// ABOUTME: Configuration loading and resolution for hosts, components and projects
// A TOML file is parsed once and merged into a single immutable RuntimeConfig

pub mod file;
pub mod resolve;
pub mod runtime;

pub use file::{ComponentEntry, Config, DebuggerEntry, Defaults, HostEntry, HostKind, ProjectEntry};
pub use resolve::Selection;
pub use runtime::{
    ComponentRuntime, DebuggerSettings, HostKeyPolicy, HostMode, HostRuntime, RuntimeConfig,
    SshTarget, TargetMode,
};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Unknown project: {0}")]
    UnknownProject(String),

    #[error("Several {kind} entries are configured, choose one of: {}", choices.join(", "))]
    Ambiguous {
        kind: &'static str,
        choices: Vec<String>,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            hosts = config.hosts.len(),
            components = config.components.len(),
            projects = config.projects.len(),
            "Loaded config from {}",
            path.display()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
