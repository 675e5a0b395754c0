// ABOUTME: Runtime actions accepted while a swap is active, plus the cleanup confirmation seam

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAction {
    /// Recreate the dev container with the debugger switched on or off.
    ToggleDebugger,
    /// Upload the binary again and restart the dev container.
    Redeploy,
    Quit,
}

impl FromStr for SwapAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "d" | "debug" => Ok(SwapAction::ToggleDebugger),
            "r" | "redeploy" => Ok(SwapAction::Redeploy),
            "q" | "quit" => Ok(SwapAction::Quit),
            other => Err(format!("unknown action '{other}' (use d, r or q)")),
        }
    }
}

/// Asks the user before a leftover dev container is removed.
pub trait ConfirmPrompt: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Fixed answer, for `--yes` and tests.
pub struct FixedAnswer(pub bool);

impl ConfirmPrompt for FixedAnswer {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}
