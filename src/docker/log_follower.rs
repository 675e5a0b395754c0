// ABOUTME: Follows a container's log output across restarts and mirrors it to an optional file
// Lines go to an unbounded channel; the stream is reopened after a fixed backoff whenever it ends

use super::{ContainerError, ContainerManager};
use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct LogFollowerOptions {
    pub container: String,
    pub tail: u32,
    pub reconnect_delay: Duration,
    pub log_file: Option<PathBuf>,
}

pub struct LogFollower {
    manager: ContainerManager,
    options: LogFollowerOptions,
    line_sender: mpsc::UnboundedSender<String>,
    reconnects: Arc<AtomicUsize>,
}

impl LogFollower {
    pub fn new(
        manager: ContainerManager,
        options: LogFollowerOptions,
        line_sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            manager,
            options,
            line_sender,
            reconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of backoff waits taken so far.
    pub fn reconnect_counter(&self) -> Arc<AtomicUsize> {
        self.reconnects.clone()
    }

    /// Follow until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut log_file = match &self.options.log_file {
            Some(path) => match open_log_file(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Cannot open log file {}: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };

        info!("Following logs of {}", self.options.container);
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.follow_once(&cancel, &mut log_file).await {
                Ok(()) => debug!("Log stream of {} ended", self.options.container),
                Err(e) => warn!("Log stream of {} failed: {}", self.options.container, e),
            }

            if cancel.is_cancelled() || self.line_sender.is_closed() {
                break;
            }

            self.reconnects.fetch_add(1, Ordering::SeqCst);
            debug!(
                "Reconnecting to logs of {} in {:?}",
                self.options.container, self.options.reconnect_delay
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.options.reconnect_delay) => {}
            }
        }

        if let Some(file) = log_file.as_mut() {
            let footer = format!(
                "=== 日誌結束 [{}] ===\n\n",
                Local::now().format(TIMESTAMP_FORMAT)
            );
            if let Err(e) = file.write_all(footer.as_bytes()).await {
                warn!("Failed to close log file: {}", e);
            }
            let _ = file.flush().await;
        }
        info!("Stopped following logs of {}", self.options.container);
    }

    async fn follow_once(
        &self,
        cancel: &CancellationToken,
        log_file: &mut Option<File>,
    ) -> Result<(), ContainerError> {
        self.manager.ensure_running(&self.options.container).await?;

        let mut session = self.manager.executor().create_session().await?;
        let command = self
            .manager
            .logs_command(&self.options.container, self.options.tail);
        if let Err(e) = session.start(&command).await {
            let _ = session.close().await;
            return Err(e.into());
        }

        let result = match session.take_output() {
            Ok(output) => self.pump_lines(output, cancel, log_file).await,
            Err(e) => Err(e.into()),
        };

        // Closing unblocks the far side when we stop early
        if let Err(e) = session.close().await {
            debug!("Closing log session failed: {}", e);
        }
        result
    }

    async fn pump_lines(
        &self,
        output: crate::executor::OutputStream,
        cancel: &CancellationToken,
        log_file: &mut Option<File>,
    ) -> Result<(), ContainerError> {
        let mut lines = BufReader::new(output).lines();
        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                return Ok(());
            };

            if let Some(file) = log_file.as_mut() {
                let mut entry = line.clone();
                entry.push('\n');
                if let Err(e) = file.write_all(entry.as_bytes()).await {
                    warn!("Failed to write log file, disabling it: {}", e);
                    *log_file = None;
                }
            }

            if self.line_sender.send(line).is_err() {
                // Receiver gone; nothing left to print to
                return Ok(());
            }
        }
    }
}

async fn open_log_file(path: &std::path::Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    let header = format!("\n=== 日誌開始 [{}] ===\n", Local::now().format(TIMESTAMP_FORMAT));
    file.write_all(header.as_bytes()).await?;
    Ok(file)
}
