use serde::{Deserialize, Serialize};

/// Closed set of operation classes the admission gate distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    UserRequest,
    PlanExecution,
    AutoCritique,
    AutoSummarization,
    CodebaseAnalysis,
    ContextLoading,
    BackgroundIndex,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::UserRequest => "user_request",
            OperationClass::PlanExecution => "plan_execution",
            OperationClass::AutoCritique => "auto_critique",
            OperationClass::AutoSummarization => "auto_summarization",
            OperationClass::CodebaseAnalysis => "codebase_analysis",
            OperationClass::ContextLoading => "context_loading",
            OperationClass::BackgroundIndex => "background_index",
        }
    }

    /// Still admitted under severe degradation.
    pub fn is_operator_initiated(&self) -> bool {
        matches!(
            self,
            OperationClass::UserRequest | OperationClass::PlanExecution
        )
    }

    /// Capped by the context-heavy ceiling under light degradation.
    pub fn is_context_heavy(&self) -> bool {
        matches!(
            self,
            OperationClass::CodebaseAnalysis | OperationClass::ContextLoading
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    #[default]
    None,
    Light,
    Moderate,
    Severe,
}

impl DegradationLevel {
    pub fn as_str(&self) -> &str {
        match self {
            DegradationLevel::None => "none",
            DegradationLevel::Light => "light",
            DegradationLevel::Moderate => "moderate",
            DegradationLevel::Severe => "severe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub degradation: DegradationLevel,
    pub remaining_quota: u64,
    pub usage_fraction: f64,
}

impl AdmissionDecision {
    pub fn denial_reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("request denied by budget oracle")
    }
}

/// Admission gate consulted before any cost is incurred.
///
/// `admit` must never mutate consumption; only `record` does.
pub trait BudgetOracle: Send + Sync {
    fn admit(&self, estimated_cost: u64, class: OperationClass) -> AdmissionDecision;
    fn record(&self, input_cost: u64, output_cost: u64);
}
