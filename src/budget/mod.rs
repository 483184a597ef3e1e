pub mod ledger;
pub mod oracle;

pub use ledger::{BudgetAnalytics, BudgetConfig, BudgetLedger, BudgetSnapshot, BudgetStatus, Thresholds};
pub use oracle::{AdmissionDecision, BudgetOracle, DegradationLevel, OperationClass};
