// ABOUTME: Swap workflow: phases, runtime actions and reverse-order cleanup

pub mod action;
pub mod compensation;
pub mod debugger;
pub mod orchestrator;

pub use action::{ConfirmPrompt, FixedAnswer, SwapAction};
pub use compensation::{Compensation, CompensationStack};
pub use debugger::find_local_debugger;
pub use orchestrator::SwapOrchestrator;
