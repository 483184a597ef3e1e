pub mod simulated;

pub use simulated::SimulatedRunner;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Action;

/// Performs the work an action describes. Opaque to the scheduler.
///
/// `Ok(false)` and `Err(_)` are both recorded as failures; an error's message
/// is preserved in the execution report. Timeouts belong here, not in the
/// executor.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, action: &Action) -> Result<bool>;
}
