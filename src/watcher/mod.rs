// ABOUTME: Watches the developer's binary and fires once per burst of rebuild writes
// The parent directory is watched so binaries replaced by rename are still seen

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("Cannot watch {0}: no parent directory or file name")]
    InvalidPath(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ChangeWatcher {
    target: PathBuf,
    quiet: Duration,
}

impl ChangeWatcher {
    pub fn new(path: &Path, quiet: Duration) -> Result<Self, WatchError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| WatchError::InvalidPath(path.to_path_buf()))?;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        // Events carry canonical directory paths
        let target = parent.canonicalize()?.join(file_name);
        Ok(Self { target, quiet })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Watch until `cancel` fires, calling `on_change` once per quiet window.
    pub async fn run<F, Fut>(
        self,
        cancel: CancellationToken,
        on_change: F,
    ) -> Result<(), WatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let dir = self
            .target
            .parent()
            .ok_or_else(|| WatchError::InvalidPath(self.target.clone()))?
            .to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) if is_relevant(&event.kind) => {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("File watch error: {}", e),
            })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching {} for changes", self.target.display());

        debounce(rx, &self.target, self.quiet, cancel, on_change).await;

        // Dropping the watcher stops the notification thread
        drop(watcher);
        debug!("Stopped watching {}", self.target.display());
        Ok(())
    }
}

/// Whether a notification kind can mean new content.
///
/// Plain reads are ignored so uploading the binary does not retrigger a redeploy.
pub fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

/// Collapse notifications for `target` into one `on_change` call per quiet window.
///
/// Every matching path rearms the timer. Paths other than `target` are ignored.
pub async fn debounce<F, Fut>(
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    target: &Path,
    quiet: Duration,
    cancel: CancellationToken,
    mut on_change: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(path) if path == target => {
                    deadline = Some(Instant::now() + quiet);
                }
                Some(path) => debug!("Ignoring change to {}", path.display()),
                None => break,
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                deadline = None;
                info!("Detected change in {}", target.display());
                on_change().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    #[test]
    fn test_relevant_event_kinds() {
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Access(AccessKind::Close(AccessMode::Write))));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Open(AccessMode::Read))));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Close(AccessMode::Read))));
    }

    #[test]
    fn test_new_resolves_target_against_canonical_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let watcher =
            ChangeWatcher::new(&dir.path().join("api"), Duration::from_millis(500)).unwrap();
        assert_eq!(
            watcher.target(),
            dir.path().canonicalize().unwrap().join("api")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rearms_on_each_event() {
        let (tx, rx) = mpsc::unbounded_channel();
        let target = PathBuf::from("/work/bin/api");
        let cancel = CancellationToken::new();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let task = {
            let fired = fired.clone();
            let cancel = cancel.clone();
            let target = target.clone();
            tokio::spawn(async move {
                debounce(rx, &target, Duration::from_millis(500), cancel, || {
                    fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async {}
                })
                .await;
            })
        };

        tx.send(target.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        tx.send(target.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        // 800ms after the first write, but only 400ms after the last
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
