// ABOUTME: Locates a local debugger binary to ship alongside the developer's binary

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEBUGGER_COMMAND: &str = "dlv";

/// The configured debugger if it exists, otherwise `dlv` from `PATH`.
///
/// A configured path that does not exist is not replaced by a `PATH` lookup.
pub fn find_local_debugger(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!("Configured debugger {} does not exist", path.display());
        return None;
    }

    match which::which(DEBUGGER_COMMAND) {
        Ok(path) => Some(path),
        Err(e) => {
            debug!("No local {} found: {}", DEBUGGER_COMMAND, e);
            None
        }
    }
}
