use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;
use crate::types::{Workflow, WorkflowStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StopRequested,
    StrategyFinished,
    StrategyFailed,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleEvent::StopRequested => "stop_requested",
            LifecycleEvent::StrategyFinished => "strategy_finished",
            LifecycleEvent::StrategyFailed => "strategy_failed",
        }
    }
}

/// `running -> {paused, completed, failed}`. Nothing resumes a paused or
/// failed workflow; a new workflow must be submitted instead.
pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    pub fn next_status(
        current: WorkflowStatus,
        event: LifecycleEvent,
    ) -> Result<WorkflowStatus, OrchestrationError> {
        let next = match (current, event) {
            (WorkflowStatus::Running, LifecycleEvent::StopRequested) => WorkflowStatus::Paused,
            (WorkflowStatus::Running, LifecycleEvent::StrategyFinished) => WorkflowStatus::Completed,
            (WorkflowStatus::Running, LifecycleEvent::StrategyFailed) => WorkflowStatus::Failed,

            // A stopped workflow keeps its paused status however its strategy unwinds.
            (WorkflowStatus::Paused, _) => WorkflowStatus::Paused,

            (from, event) => {
                return Err(OrchestrationError::InvalidTransition {
                    from: from.as_str().to_string(),
                    event: event.as_str().to_string(),
                });
            }
        };
        Ok(next)
    }

    pub fn transition(
        workflow: &mut Workflow,
        event: LifecycleEvent,
    ) -> Result<WorkflowStatus, OrchestrationError> {
        let next = Self::next_status(workflow.status, event)?;
        if next != workflow.status {
            log::debug!(
                "Workflow {} {} -> {} on {}",
                workflow.id,
                workflow.status.as_str(),
                next.as_str(),
                event.as_str()
            );
        }
        workflow.status = next;
        Ok(next)
    }
}
