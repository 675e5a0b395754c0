// ABOUTME: Execution surface abstraction over the local machine and remote SSH hosts
// Everything above this module runs commands, moves files and forwards ports through `Executor`

pub mod error;
pub mod local;
pub mod remote;
pub mod shell;
pub mod tunnel;

pub use error::ExecError;
pub use local::LocalExecutor;
pub use remote::RemoteExecutor;
pub use shell::Elevation;
pub use tunnel::{NoopTunnel, Tunnel};

use crate::config::{HostMode, HostRuntime};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;

/// Live output of a streaming command.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Command execution, file placement and port forwarding against one host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command to completion and return its combined output.
    async fn execute(&self, command: &str) -> Result<String, ExecError>;

    /// Open a handle for a long-running command whose output is read as it arrives.
    async fn create_session(&self) -> Result<Box<dyn StreamSession>, ExecError>;

    /// Place a local file at `remote_path`, replacing any previous file, and mark it executable.
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError>;

    /// Write an executable script at `path` in one visible step.
    async fn create_script(&self, content: &str, path: &str) -> Result<(), ExecError>;

    /// Forward `local_port` to `remote_port` on the far end of the transport.
    async fn create_tunnel(
        &self,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelCloser>, ExecError>;

    fn is_remote(&self) -> bool;

    async fn close(&self) -> Result<(), ExecError>;
}

/// A single streaming command. Must be closed on every exit path.
#[async_trait]
pub trait StreamSession: Send {
    async fn start(&mut self, command: &str) -> Result<(), ExecError>;

    /// Hand out the output stream. Available as soon as `start` returns.
    fn take_output(&mut self) -> Result<OutputStream, ExecError>;

    async fn wait(&mut self) -> Result<(), ExecError>;

    async fn close(&mut self) -> Result<(), ExecError>;
}

/// Handle that stops a port forward from accepting new connections.
pub trait TunnelCloser: Send + Sync {
    fn close(&self) -> Result<(), ExecError>;
}

/// Build the execution surface for the selected host.
pub async fn connect(host: &HostRuntime) -> Result<Arc<dyn Executor>, ExecError> {
    match &host.mode {
        HostMode::Local => {
            info!("Using local execution surface");
            Ok(Arc::new(LocalExecutor::new(host.elevation.clone())))
        }
        HostMode::Remote(target) => {
            info!("Connecting to {}@{}:{}", target.user, target.host, target.port);
            let executor = RemoteExecutor::connect(target, host.elevation.clone()).await?;
            Ok(Arc::new(executor))
        }
    }
}
