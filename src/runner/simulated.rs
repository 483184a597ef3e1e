use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use super::ActionRunner;
use crate::types::{Action, ActionIndex};

/// Dry-run runner: sleeps for a fixed latency and succeeds unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRunner {
    latency: Duration,
    failures: HashSet<ActionIndex>,
    errors: HashSet<ActionIndex>,
}

impl SimulatedRunner {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Report `false` for this action.
    pub fn fail(mut self, index: impl Into<ActionIndex>) -> Self {
        self.failures.insert(index.into());
        self
    }

    /// Raise an error for this action.
    pub fn error(mut self, index: impl Into<ActionIndex>) -> Self {
        self.errors.insert(index.into());
        self
    }
}

#[async_trait]
impl ActionRunner for SimulatedRunner {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(&self, action: &Action) -> Result<bool> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        log::debug!(
            "Simulated {} for action {}",
            action.kind.as_str(),
            action.index
        );

        if self.errors.contains(&action.index) {
            return Err(anyhow!(
                "simulated error in {} action",
                action.kind.as_str()
            ));
        }

        Ok(!self.failures.contains(&action.index))
    }
}
