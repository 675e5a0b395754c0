// ABOUTME: Container lifecycle for the swap: snapshot, stop and restore the original service,
// and create, start, restart and remove the dev container, all through the engine CLI

use super::command::{exact_name_filter, EngineCommands};
use super::run_spec::{
    entry_script, DebuggerLaunch, DevArtifacts, RunSpec, OWNERSHIP_LABEL_KEY, OWNERSHIP_LABEL_VALUE,
};
use super::snapshot::ContainerSnapshot;
use super::ContainerError;
use crate::config::TargetMode;
use crate::executor::{ExecError, Executor};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity of a dev container this run created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevContainer {
    pub name: String,
    pub id: String,
    /// Service whose configuration the container copies.
    pub original_service: String,
}

/// Result of looking up a container by exact name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevContainerStatus {
    pub exists: bool,
    /// Carries the dev-swap ownership label.
    pub owned: bool,
    pub id: Option<String>,
}

/// Inputs for creating the dev container on top of a snapshot.
#[derive(Debug, Clone)]
pub struct DevContainerRequest {
    pub name: String,
    /// Where the uploaded binary appears inside the container.
    pub container_binary_path: String,
    pub artifacts: DevArtifacts,
    /// Run the binary under the debugger when set.
    pub debugger: Option<DebuggerLaunch>,
    pub extra_ports: Vec<u16>,
}

impl DevContainerRequest {
    fn published_ports(&self) -> Vec<u16> {
        let mut ports = self.extra_ports.clone();
        if let Some(debugger) = &self.debugger {
            ports.push(debugger.port);
        }
        ports
    }
}

/// Runs container lifecycle commands for one swap target through an [`Executor`].
///
/// Every operation is a single engine or compose CLI call, so the same manager
/// drives a local engine and a remote one over SSH.
#[derive(Clone)]
pub struct ContainerManager {
    executor: Arc<dyn Executor>,
    commands: EngineCommands,
    target: TargetMode,
}

impl ContainerManager {
    /// Manager that addresses the original service according to `target`.
    pub fn new(executor: Arc<dyn Executor>, commands: EngineCommands, target: TargetMode) -> Self {
        Self {
            executor,
            commands,
            target,
        }
    }

    /// Id of the container backing `service`, including stopped ones.
    pub async fn resolve_container_id(&self, service: &str) -> Result<String, ContainerError> {
        let command = match &self.target {
            TargetMode::Compose { compose_dir } => {
                self.commands.compose(compose_dir, &["ps", "-a", "-q", service])
            }
            TargetMode::Adopt => self.commands.engine(&[
                "ps",
                "-a",
                "-q",
                "--filter",
                exact_name_filter(service).as_str(),
            ]),
        };

        let output = self.executor.execute(&command).await?;
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ContainerError::ServiceNotFound(service.to_string()))
    }

    /// Resolve and inspect the container behind `service`.
    pub async fn snapshot(&self, service: &str) -> Result<ContainerSnapshot, ContainerError> {
        let id = self.resolve_container_id(service).await?;
        debug!("Inspecting container {} for service {}", id, service);

        let output = self
            .executor
            .execute(&self.commands.engine(&["inspect", id.as_str()]))
            .await?;
        let snapshot = ContainerSnapshot::from_inspect(service, &output)?;

        info!(
            service = %service,
            image = %snapshot.image,
            volumes = snapshot.volumes.len(),
            networks = snapshot.networks.len(),
            "Captured container configuration"
        );
        Ok(snapshot)
    }

    /// Stop the original service without removing its definition.
    pub async fn stop(&self, service: &str) -> Result<(), ContainerError> {
        let command = match &self.target {
            TargetMode::Compose { compose_dir } => {
                self.commands.compose(compose_dir, &["stop", service])
            }
            TargetMode::Adopt => self.commands.engine(&["stop", service]),
        };
        self.executor.execute(&command).await?;
        info!("Stopped original service {}", service);
        Ok(())
    }

    /// Start the original service again. Starting a running service is a no-op.
    pub async fn restore(&self, service: &str) -> Result<(), ContainerError> {
        let command = match &self.target {
            TargetMode::Compose { compose_dir } => {
                self.commands.compose(compose_dir, &["start", service])
            }
            TargetMode::Adopt => self.commands.engine(&["start", service]),
        };
        self.executor.execute(&command).await?;
        info!("Restored original service {}", service);
        Ok(())
    }

    /// Look up a container by exact name and report whether dev-swap owns it.
    pub async fn check_dev_container_exists(
        &self,
        name: &str,
    ) -> Result<DevContainerStatus, ContainerError> {
        let output = self
            .executor
            .execute(&self.commands.engine(&[
                "ps",
                "-a",
                "-q",
                "--filter",
                exact_name_filter(name).as_str(),
            ]))
            .await?;

        let Some(id) = output.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(DevContainerStatus::default());
        };

        let format = format!("{{{{ index .Config.Labels \"{OWNERSHIP_LABEL_KEY}\" }}}}");
        let label = self
            .executor
            .execute(&self.commands.engine(&["inspect", "-f", format.as_str(), id]))
            .await?;

        Ok(DevContainerStatus {
            exists: true,
            owned: label.trim() == OWNERSHIP_LABEL_VALUE,
            id: Some(id.to_string()),
        })
    }

    /// Remove `name` only if dev-swap created it.
    pub async fn remove_if_owned(&self, name: &str) -> Result<(), ContainerError> {
        let status = self.check_dev_container_exists(name).await?;
        if !status.exists {
            return Ok(());
        }
        if !status.owned {
            return Err(ContainerError::NameConflict(name.to_string()));
        }
        self.remove(name).await
    }

    /// Create, but do not start, the dev container described by `request`.
    ///
    /// Refuses when a container already holds the name. If attaching an extra
    /// network fails, the new container is removed before the error returns.
    pub async fn create_dev_container(
        &self,
        snapshot: &ContainerSnapshot,
        request: &DevContainerRequest,
    ) -> Result<DevContainer, ContainerError> {
        let status = self.check_dev_container_exists(&request.name).await?;
        if status.exists {
            return Err(if status.owned {
                ContainerError::ResidualContainer(request.name.clone())
            } else {
                ContainerError::NameConflict(request.name.clone())
            });
        }

        let script = entry_script(
            &request.container_binary_path,
            request.debugger.as_ref(),
            request.artifacts.debugger.is_some(),
        );
        self.executor
            .create_script(&script, &request.artifacts.entry_script)
            .await?;

        let spec = RunSpec::build(
            snapshot,
            &request.name,
            &request.container_binary_path,
            &request.artifacts,
            request.published_ports(),
        );
        let output = self
            .executor
            .execute(&self.commands.engine(&spec.create_args()))
            .await?;
        let id = output
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ContainerError::OperationFailed(format!(
                    "create of {} returned no container id",
                    request.name
                ))
            })?;

        for network in spec.additional_networks() {
            let connect = self.commands.engine(&[
                "network",
                "connect",
                network.as_str(),
                request.name.as_str(),
            ]);
            if let Err(e) = self.executor.execute(&connect).await {
                // The caller only tracks containers that were fully created
                warn!("Attaching {} to network {} failed, removing it", request.name, network);
                if let Err(cleanup) = self.remove(&request.name).await {
                    warn!("Removing half-created {} failed: {}", request.name, cleanup);
                }
                return Err(e.into());
            }
        }

        info!(
            name = %request.name,
            debugger = request.debugger.is_some(),
            "Created dev container"
        );
        Ok(DevContainer {
            name: request.name.clone(),
            id,
            original_service: snapshot.service.clone(),
        })
    }

    /// Start a created container.
    pub async fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.executor
            .execute(&self.commands.engine(&["start", name]))
            .await?;
        Ok(())
    }

    /// Restart a container so it picks up a replaced binary.
    pub async fn restart(&self, name: &str) -> Result<(), ContainerError> {
        self.executor
            .execute(&self.commands.engine(&["restart", name]))
            .await?;
        Ok(())
    }

    /// Force-remove a container, running or not. Ownership is not checked.
    pub async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        self.executor
            .execute(&self.commands.engine(&["rm", "-f", name]))
            .await?;
        info!("Removed container {}", name);
        Ok(())
    }

    /// Whether `name` exists and is running. A missing container is not an error.
    pub async fn check_running(&self, name: &str) -> Result<bool, ContainerError> {
        let command = self
            .commands
            .engine(&["inspect", "-f", "{{.State.Running}}", name]);
        match self.executor.execute(&command).await {
            Ok(output) => Ok(output.trim() == "true"),
            Err(ExecError::CommandFailed { output, .. }) => {
                debug!("Container {} is not inspectable: {}", name, output.trim());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like `check_running`, but a stopped or missing container is an error.
    pub async fn ensure_running(&self, name: &str) -> Result<(), ContainerError> {
        if self.check_running(name).await? {
            Ok(())
        } else {
            warn!("Container {} is not running", name);
            Err(ContainerError::NotRunning(name.to_string()))
        }
    }

    /// Command that follows a container's output starting with its last `tail` lines.
    pub fn logs_command(&self, name: &str, tail: u32) -> String {
        self.commands
            .engine(&["logs", "-f", "--tail", tail.to_string().as_str(), name])
    }

    /// Executor the manager runs its commands through.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }
}
