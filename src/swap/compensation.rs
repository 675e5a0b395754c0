// ABOUTME: Reverse-order cleanup actions registered as each swap phase succeeds
// Unwinding runs every step even when an earlier one fails

use crate::docker::ContainerManager;
use crate::executor::TunnelCloser;
use std::fmt;
use tracing::{error, info};

pub enum Compensation {
    RestoreOriginal { service: String },
    RemoveDevContainer { name: String },
    CloseTunnel(Box<dyn TunnelCloser>),
}

impl fmt::Debug for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::RestoreOriginal { service } => {
                write!(f, "restore original service {service}")
            }
            Compensation::RemoveDevContainer { name } => write!(f, "remove dev container {name}"),
            Compensation::CloseTunnel(_) => write!(f, "close debugger tunnel"),
        }
    }
}

impl Compensation {
    async fn apply(self, manager: &ContainerManager) -> anyhow::Result<()> {
        match self {
            Compensation::RestoreOriginal { service } => manager.restore(&service).await?,
            Compensation::RemoveDevContainer { name } => manager.remove(&name).await?,
            Compensation::CloseTunnel(tunnel) => tunnel.close()?,
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CompensationStack {
    steps: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every registered step, newest first. Returns how many failed.
    pub async fn unwind(&mut self, manager: &ContainerManager) -> usize {
        let mut failures = 0;
        while let Some(step) = self.steps.pop() {
            let description = format!("{step:?}");
            info!("Cleanup: {}", description);
            if let Err(e) = step.apply(manager).await {
                failures += 1;
                error!("Cleanup step failed ({}): {:#}", description, e);
            }
        }
        failures
    }
}
