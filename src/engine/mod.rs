pub mod analyzer;
pub mod dependencies;
pub mod executor;
pub mod locks;

pub use analyzer::{analyze, validate, OrchestrationAnalysis, ResourceConflict};
pub use executor::{
    ActionOutcome, ActionResult, ExecutionMetrics, ExecutionReport, ExecutorConfig,
    WorkflowExecutor,
};
pub use locks::{ResourceLockManager, ResourceReservation, SharedWorkflow};
