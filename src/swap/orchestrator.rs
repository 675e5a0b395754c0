// ABOUTME: End-to-end swap workflow: replace a service container with a dev container,
// keep it in sync with rebuilds, then tear down and restore the original in reverse order

use super::action::{ConfirmPrompt, SwapAction};
use super::compensation::{Compensation, CompensationStack};
use super::debugger::find_local_debugger;
use crate::config::RuntimeConfig;
use crate::docker::run_spec::init_script;
use crate::docker::{
    ContainerError, ContainerManager, ContainerSnapshot, DebuggerLaunch, DevArtifacts,
    DevContainer, DevContainerRequest, EngineCommands, LogFollower, LogFollowerOptions,
};
use crate::executor::Executor;
use crate::watcher::ChangeWatcher;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct SwapOrchestrator {
    config: RuntimeConfig,
    executor: Arc<dyn Executor>,
    manager: ContainerManager,
    prompt: Arc<dyn ConfirmPrompt>,
    log_lines: mpsc::UnboundedSender<String>,
}

/// Mutable state of the running swap, owned by the orchestrator's main loop.
struct ActiveSwap {
    snapshot: ContainerSnapshot,
    dev: DevContainer,
    debugger_enabled: bool,
    uploaded_debugger: Option<String>,
    debugger_searched: bool,
    tunnel_open: bool,
}

impl SwapOrchestrator {
    pub fn new(
        config: RuntimeConfig,
        executor: Arc<dyn Executor>,
        prompt: Arc<dyn ConfirmPrompt>,
        log_lines: mpsc::UnboundedSender<String>,
    ) -> Self {
        let manager = ContainerManager::new(
            executor.clone(),
            EngineCommands::for_host(&config.host),
            config.target.clone(),
        );
        Self {
            config,
            executor,
            manager,
            prompt,
            log_lines,
        }
    }

    /// Run the swap until `cancel` fires or a quit action arrives, then clean up.
    ///
    /// `ready` is signalled once the dev container is up and background tasks are running.
    pub async fn run(
        self,
        cancel: CancellationToken,
        actions: mpsc::UnboundedReceiver<SwapAction>,
        ready: Option<oneshot::Sender<()>>,
    ) -> Result<()> {
        let mut stack = CompensationStack::new();
        let result = self.run_phases(&cancel, actions, ready, &mut stack).await;

        if let Err(e) = &result {
            error!("Swap failed: {:#}", e);
        }
        if !stack.is_empty() {
            info!("Cleaning up ({} steps)", stack.len());
        }
        let failures = stack.unwind(&self.manager).await;
        if failures > 0 {
            warn!("{} cleanup step(s) failed; check the host manually", failures);
        } else {
            info!("Cleanup complete");
        }
        result
    }

    async fn run_phases(
        &self,
        cancel: &CancellationToken,
        mut actions: mpsc::UnboundedReceiver<SwapAction>,
        ready: Option<oneshot::Sender<()>>,
        stack: &mut CompensationStack,
    ) -> Result<()> {
        let component = &self.config.component;
        let service = component.target_service.as_str();

        info!("Capturing configuration of {}", service);
        let snapshot = self
            .manager
            .snapshot(service)
            .await
            .with_context(|| format!("Failed to capture configuration of service {service}"))?;

        let mut swap = ActiveSwap {
            snapshot,
            dev: DevContainer {
                name: self.config.dev_container_name(),
                id: String::new(),
                original_service: service.to_string(),
            },
            debugger_enabled: component.debugger.enabled,
            uploaded_debugger: None,
            debugger_searched: false,
            tunnel_open: false,
        };

        if swap.debugger_enabled {
            self.ship_debugger(&mut swap).await;
        }

        info!("Uploading {}", component.local_binary.display());
        self.executor
            .upload_file(&component.local_binary, &self.config.remote_binary_path())
            .await
            .context("Failed to upload binary")?;
        self.executor
            .create_script(
                &init_script(&component.initial_scripts),
                &self.config.remote_init_script_path(),
            )
            .await
            .context("Failed to write init script")?;

        if cancel.is_cancelled() {
            return Ok(());
        }

        self.manager
            .stop(service)
            .await
            .with_context(|| format!("Failed to stop service {service}"))?;
        stack.push(Compensation::RestoreOriginal {
            service: service.to_string(),
        });

        swap.dev = self.create_with_cleanup_retry(&swap).await?;
        stack.push(Compensation::RemoveDevContainer {
            name: swap.dev.name.clone(),
        });

        self.manager
            .start(&swap.dev.name)
            .await
            .with_context(|| format!("Failed to start dev container {}", swap.dev.name))?;
        info!("Dev container {} is running", swap.dev.name);

        if swap.debugger_enabled {
            self.open_tunnel(&mut swap, stack).await?;
        }

        self.watch_and_follow(cancel, &mut actions, ready, &mut swap, stack)
            .await
    }

    /// Create the dev container, offering one cleanup-and-retry for a leftover from an earlier run.
    async fn create_with_cleanup_retry(&self, swap: &ActiveSwap) -> Result<DevContainer> {
        let request = self.dev_request(swap, swap.debugger_enabled);
        match self
            .manager
            .create_dev_container(&swap.snapshot, &request)
            .await
        {
            Ok(dev) => Ok(dev),
            Err(ContainerError::ResidualContainer(name)) => {
                warn!("Found leftover dev container {}", name);
                let prompt = self.prompt.clone();
                let message = format!("Remove leftover dev container {name} and continue?");
                let confirmed = tokio::task::spawn_blocking(move || prompt.confirm(&message))
                    .await
                    .context("Confirmation prompt failed")?;
                if !confirmed {
                    bail!("Leftover dev container {name} was not removed");
                }

                self.manager
                    .remove_if_owned(&name)
                    .await
                    .with_context(|| format!("Failed to remove leftover dev container {name}"))?;
                self.manager
                    .create_dev_container(&swap.snapshot, &request)
                    .await
                    .with_context(|| format!("Failed to create dev container {name}"))
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to create dev container {}", request.name))
            }
        }
    }

    fn dev_request(&self, swap: &ActiveSwap, debugger_enabled: bool) -> DevContainerRequest {
        let component = &self.config.component;
        DevContainerRequest {
            name: swap.dev.name.clone(),
            container_binary_path: component.container_binary_path.clone(),
            artifacts: DevArtifacts {
                binary: self.config.remote_binary_path(),
                entry_script: self.config.remote_entry_script_path(),
                init_script: self.config.remote_init_script_path(),
                debugger: swap.uploaded_debugger.clone(),
            },
            debugger: debugger_enabled.then(|| DebuggerLaunch {
                port: component.debugger.port,
                args: component.debugger.args.clone(),
            }),
            extra_ports: component.extra_ports.clone(),
        }
    }

    /// Find and upload a local debugger. Failure falls back to one inside the image.
    async fn ship_debugger(&self, swap: &mut ActiveSwap) {
        if swap.debugger_searched {
            return;
        }
        swap.debugger_searched = true;

        let Some(local) = find_local_debugger(self.config.component.debugger.local_path.as_deref())
        else {
            warn!("No local debugger found; using the one in the image, if any");
            return;
        };

        let remote = self.config.remote_debugger_path();
        info!("Uploading debugger {}", local.display());
        match self.executor.upload_file(&local, &remote).await {
            Ok(()) => swap.uploaded_debugger = Some(remote),
            Err(e) => warn!("Debugger upload failed, using the one in the image: {}", e),
        }
    }

    async fn open_tunnel(
        &self,
        swap: &mut ActiveSwap,
        stack: &mut CompensationStack,
    ) -> Result<()> {
        let port = self.config.component.debugger.port;
        if swap.tunnel_open || !self.executor.is_remote() {
            info!("Debugger listening on localhost:{}", port);
            return Ok(());
        }

        let tunnel = self
            .executor
            .create_tunnel(port, port)
            .await
            .with_context(|| format!("Failed to open debugger tunnel on port {port}"))?;
        stack.push(Compensation::CloseTunnel(tunnel));
        swap.tunnel_open = true;
        info!("Debugger reachable at localhost:{}", port);
        Ok(())
    }

    async fn watch_and_follow(
        &self,
        cancel: &CancellationToken,
        actions: &mut mpsc::UnboundedReceiver<SwapAction>,
        ready: Option<oneshot::Sender<()>>,
        swap: &mut ActiveSwap,
        stack: &mut CompensationStack,
    ) -> Result<()> {
        let component = &self.config.component;
        // Background work stops before cleanup begins
        let background = cancel.child_token();

        let watcher = ChangeWatcher::new(&component.local_binary, component.debounce)
            .context("Failed to watch the local binary")?;
        let (changes_tx, mut changes) = mpsc::unbounded_channel();
        let watch_task: JoinHandle<()> = tokio::spawn({
            let token = background.clone();
            async move {
                let on_change = move || {
                    let _ = changes_tx.send(SwapAction::Redeploy);
                    async {}
                };
                if let Err(e) = watcher.run(token, on_change).await {
                    error!("Change watcher stopped: {}", e);
                }
            }
        });

        let follower = LogFollower::new(
            self.manager.clone(),
            LogFollowerOptions {
                container: swap.dev.name.clone(),
                tail: component.log_tail,
                reconnect_delay: component.reconnect_delay,
                log_file: component.log_file.clone(),
            },
            self.log_lines.clone(),
        );
        let follow_task = tokio::spawn(follower.run(background.clone()));

        if let Some(ready) = ready {
            let _ = ready.send(());
        }
        info!("Swap active. Rebuild the binary to redeploy; Ctrl+C to restore");

        let mut actions_open = true;
        loop {
            let action = tokio::select! {
                () = cancel.cancelled() => break,
                Some(action) = changes.recv() => action,
                action = actions.recv(), if actions_open => match action {
                    Some(action) => action,
                    None => {
                        actions_open = false;
                        continue;
                    }
                },
            };

            match action {
                SwapAction::Quit => {
                    info!("Quit requested");
                    break;
                }
                SwapAction::Redeploy => self.redeploy(swap).await,
                SwapAction::ToggleDebugger => {
                    if let Err(e) = self.toggle_debugger(swap, stack).await {
                        error!("Debugger toggle failed: {:#}", e);
                    }
                }
            }
        }

        background.cancel();
        if let Err(e) = watch_task.await {
            warn!("Change watcher task ended abnormally: {}", e);
        }
        if let Err(e) = follow_task.await {
            warn!("Log follower task ended abnormally: {}", e);
        }
        Ok(())
    }

    async fn redeploy(&self, swap: &ActiveSwap) {
        let component = &self.config.component;
        info!("Redeploying {}", component.local_binary.display());
        if let Err(e) = self
            .executor
            .upload_file(&component.local_binary, &self.config.remote_binary_path())
            .await
        {
            error!("Upload failed: {}", e);
            return;
        }
        match self.manager.restart(&swap.dev.name).await {
            Ok(()) => info!("Redeployed {}", swap.dev.name),
            Err(e) => error!("Restart of {} failed: {}", swap.dev.name, e),
        }
    }

    /// Recreate the dev container with the debugger flipped.
    ///
    /// The new mode is recorded only once its container runs. If it cannot be
    /// brought up, the container is recreated in the previous mode.
    async fn toggle_debugger(
        &self,
        swap: &mut ActiveSwap,
        stack: &mut CompensationStack,
    ) -> Result<()> {
        let enable = !swap.debugger_enabled;
        info!("Switching debugger {}", if enable { "on" } else { "off" });
        if enable {
            self.ship_debugger(swap).await;
        }

        let previous = swap.debugger_enabled;
        if let Err(e) = self.recreate(swap, enable).await {
            warn!("Recreating {} failed, restoring the previous mode", swap.dev.name);
            if let Err(restore) = self.recreate(swap, previous).await {
                error!("Restoring {} failed: {:#}", swap.dev.name, restore);
            }
            return Err(e);
        }
        swap.debugger_enabled = enable;

        if swap.debugger_enabled {
            self.open_tunnel(swap, stack).await?;
        }
        Ok(())
    }

    async fn recreate(&self, swap: &mut ActiveSwap, debugger_enabled: bool) -> Result<()> {
        // Also clears what a failed earlier attempt left holding the name
        self.manager
            .remove_if_owned(&swap.dev.name)
            .await
            .context("Failed to clear dev container name")?;
        swap.dev = self
            .manager
            .create_dev_container(&swap.snapshot, &self.dev_request(swap, debugger_enabled))
            .await
            .context("Failed to recreate dev container")?;
        self.manager
            .start(&swap.dev.name)
            .await
            .context("Failed to start dev container")?;
        Ok(())
    }
}
