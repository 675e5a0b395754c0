// ABOUTME: Builds engine and compose command lines with the host's configured tool names
// Elevation is applied later by the executor, never here

use crate::config::HostRuntime;
use crate::executor::shell::{join_args, quote};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommands {
    engine: String,
    compose: String,
}

impl EngineCommands {
    pub fn new(engine: impl Into<String>, compose: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            compose: compose.into(),
        }
    }

    pub fn for_host(host: &HostRuntime) -> Self {
        Self::new(&host.docker_command, &host.compose_command)
    }

    pub fn engine<S: AsRef<str>>(&self, args: &[S]) -> String {
        format!("{} {}", self.engine, join_args(args))
    }

    pub fn compose<S: AsRef<str>>(&self, compose_dir: &str, args: &[S]) -> String {
        format!("cd {} && {} {}", quote(compose_dir), self.compose, join_args(args))
    }
}

/// Engine `--filter` value matching exactly one container name.
pub fn exact_name_filter(name: &str) -> String {
    format!("name=^/{name}$")
}
