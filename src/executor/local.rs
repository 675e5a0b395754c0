// ABOUTME: Local execution surface running commands through bash on this machine
// File "uploads" are local copies and tunnels are no-ops since no forwarding is needed

use super::shell::Elevation;
use super::{ExecError, Executor, NoopTunnel, OutputStream, StreamSession, TunnelCloser};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;
use uuid::Uuid;

pub struct LocalExecutor {
    elevation: Elevation,
}

impl LocalExecutor {
    pub fn new(elevation: Elevation) -> Self {
        Self { elevation }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, command: &str) -> Result<String, ExecError> {
        let wrapped = self.elevation.wrap(command);
        debug!(command = %command, "Executing local command");

        let output = Command::new("bash")
            .arg("-c")
            .arg(&wrapped)
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ExecError::CommandFailed {
                command: command.to_string(),
                status: output.status.code(),
                output: combined,
            });
        }

        Ok(combined)
    }

    async fn create_session(&self) -> Result<Box<dyn StreamSession>, ExecError> {
        Ok(Box::new(LocalSession::new(self.elevation.clone())))
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        let dest = Path::new(remote_path);
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        // Replace rather than overwrite so no stale bytes survive
        if fs::try_exists(dest).await? {
            fs::remove_file(dest).await?;
        }

        let mut source = fs::File::open(local_path).await?;
        let mut target = fs::File::create(dest).await?;
        tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        drop(target);

        set_executable(dest).await?;
        debug!("Copied {} to {}", local_path.display(), remote_path);
        Ok(())
    }

    async fn create_script(&self, content: &str, path: &str) -> Result<(), ExecError> {
        let dest = Path::new(path);
        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).await?;

        // Stage next to the target, then rename over it once complete and executable
        let staging = dir.join(format!(".dev-swap-{}.tmp", Uuid::new_v4()));
        fs::write(&staging, content).await?;
        if let Err(e) = set_executable(&staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        fs::rename(&staging, dest).await?;

        debug!("Wrote script {}", path);
        Ok(())
    }

    async fn create_tunnel(
        &self,
        _local_port: u16,
        _remote_port: u16,
    ) -> Result<Box<dyn TunnelCloser>, ExecError> {
        Ok(Box::new(NoopTunnel))
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Streaming command backed by a local child process.
pub struct LocalSession {
    elevation: Elevation,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl LocalSession {
    fn new(elevation: Elevation) -> Self {
        Self {
            elevation,
            child: None,
            stdout: None,
        }
    }
}

#[async_trait]
impl StreamSession for LocalSession {
    async fn start(&mut self, command: &str) -> Result<(), ExecError> {
        // Containers log to both streams; read them as one like the SSH channel does
        let wrapped = self.elevation.wrap(&format!("{command} 2>&1"));
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&wrapped)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        self.stdout = child.stdout.take();
        self.child = Some(child);
        Ok(())
    }

    fn take_output(&mut self) -> Result<OutputStream, ExecError> {
        self.stdout
            .take()
            .map(|stdout| Box::new(stdout) as OutputStream)
            .ok_or(ExecError::SessionNotStarted)
    }

    async fn wait(&mut self) -> Result<(), ExecError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(ExecError::CommandFailed {
                command: "streaming session".to_string(),
                status: status.code(),
                output: String::new(),
            })
        }
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            // Already exited is fine
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }
}
