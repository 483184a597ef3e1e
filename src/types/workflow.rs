use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::{ActionIndex, Plan, WorkflowId, WorkflowStatus};

/// Live run-state for one submitted plan.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    pub plan: Arc<Plan>,
    pub current_action: usize,
    pub started_at: DateTime<Utc>,
    pub status: WorkflowStatus,
    pub in_flight: BTreeSet<ActionIndex>,
    pub completed: BTreeSet<ActionIndex>,
    pub failed: BTreeSet<ActionIndex>,
    pub held_resources: BTreeSet<String>,
    pub pending: VecDeque<ActionIndex>,
}

impl Workflow {
    pub fn new(plan: Arc<Plan>) -> Self {
        Self {
            id: WorkflowId::new_v4(),
            plan,
            current_action: 0,
            started_at: Utc::now(),
            status: WorkflowStatus::Running,
            in_flight: BTreeSet::new(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            held_resources: BTreeSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkflowStatus::Running
    }

    pub fn is_resolved(&self, index: ActionIndex) -> bool {
        self.completed.contains(&index) || self.failed.contains(&index)
    }

    /// Returns false if the action was already resolved; the first outcome wins.
    pub fn mark_completed(&mut self, index: ActionIndex) -> bool {
        self.in_flight.remove(&index);
        if self.is_resolved(index) {
            return false;
        }
        self.completed.insert(index)
    }

    /// Returns false if the action was already resolved; the first outcome wins.
    pub fn mark_failed(&mut self, index: ActionIndex) -> bool {
        self.in_flight.remove(&index);
        if self.is_resolved(index) {
            return false;
        }
        self.failed.insert(index)
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.plan.is_empty() {
            return 0.0;
        }
        self.completed.len() as f64 / self.plan.len() as f64
    }

    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// `elapsed / progress - elapsed`, or the plan's own estimate before anything completes.
    pub fn estimated_remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let progress = self.progress_fraction();
        if progress <= 0.0 {
            return self.plan.estimated_duration();
        }

        let elapsed = self.elapsed_at(now).as_secs_f64();
        let remaining = elapsed / progress - elapsed;
        Duration::from_secs_f64(remaining.max(0.0))
    }

    pub fn progress_at(&self, now: DateTime<Utc>) -> WorkflowProgress {
        WorkflowProgress {
            id: self.id,
            plan_name: self.plan.name.clone(),
            status: self.status,
            current_action: self.current_action,
            progress: self.progress_fraction(),
            estimated_remaining: self.estimated_remaining_at(now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub id: WorkflowId,
    pub plan_name: String,
    pub status: WorkflowStatus,
    pub current_action: usize,
    pub progress: f64,
    pub estimated_remaining: Duration,
}
