use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionIndex, WorkflowId};

/// Structural problems with a plan, found before or instead of execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "issue", content = "detail", rename_all = "snake_case")]
pub enum PlanError {
    #[error("failed to parse plan: {0}")]
    Parse(String),

    #[error("action {action} depends on itself")]
    SelfDependency { action: ActionIndex },

    #[error("action {action} depends on unknown action {dependency}")]
    UnknownDependency {
        action: ActionIndex,
        dependency: ActionIndex,
    },

    #[error("parallel group {group} references unknown action {action}")]
    UnknownGroupMember { group: usize, action: ActionIndex },

    #[error("dependency cycle detected")]
    Cycle,
}

/// Workflow-level failures. Per-action failures never surface here; they are
/// recorded in the execution report and the run continues.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("plan submission rejected: {reason}")]
    AdmissionDenied { reason: String },

    #[error("workflow {workflow_id} failed: {source}")]
    InvalidPlan {
        workflow_id: WorkflowId,
        #[source]
        source: PlanError,
    },

    #[error("invalid workflow transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid budget thresholds: {0}")]
    Thresholds(String),
}
