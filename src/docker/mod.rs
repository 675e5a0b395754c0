// ABOUTME: Container engine integration for swapping a service container with a dev variant
// Drives the engine and compose CLIs through an Executor, so it works locally and over SSH

pub mod command;
pub mod container_manager;
pub mod log_follower;
pub mod run_spec;
pub mod snapshot;

pub use command::EngineCommands;
pub use container_manager::{
    ContainerManager, DevContainer, DevContainerRequest, DevContainerStatus,
};
pub use log_follower::{LogFollower, LogFollowerOptions};
pub use run_spec::{DebuggerLaunch, DevArtifacts, RunSpec};
pub use snapshot::ContainerSnapshot;

use crate::executor::ExecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("No container found for service {0}")]
    ServiceNotFound(String),
    #[error("Could not parse inspect output: {0}")]
    InspectParse(String),
    #[error("A dev container named {0} is left over from a previous run")]
    ResidualContainer(String),
    #[error("A container named {0} exists but was not created by dev-swap")]
    NameConflict(String),
    #[error("Container {0} is not running")]
    NotRunning(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Container operation failed: {0}")]
    OperationFailed(String),
}
