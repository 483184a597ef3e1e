use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::budget::{BudgetOracle, OperationClass};
use crate::engine::dependencies::dependencies_satisfied;
use crate::engine::locks::{lock_workflow, ResourceLockManager, SharedWorkflow};
use crate::error::{OrchestrationError, PlanError};
use crate::lifecycle::{LifecycleEvent, WorkflowStateMachine};
use crate::runner::ActionRunner;
use crate::types::{
    ActionIndex, ExecutionStrategy, Plan, PlanId, Workflow, WorkflowId, WorkflowProgress,
    WorkflowStatus,
};

/// Configuration for the Workflow Executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Pause between sequential actions, for rate shaping only
    pub action_delay_ms: u64,
    /// Pause between parallel groups under the mixed strategy
    pub group_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_delay_ms: 500,
            group_delay_ms: 1000,
        }
    }
}

impl ExecutorConfig {
    /// No pauses at all; used by dry runs and tests.
    pub fn immediate() -> Self {
        Self {
            action_delay_ms: 0,
            group_delay_ms: 0,
        }
    }

    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }

    pub fn group_delay(&self) -> Duration {
        Duration::from_millis(self.group_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed,
    /// Unmet dependencies, unavailable resources or a `false` result.
    Failed(String),
    /// The runner raised; the message is kept verbatim.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub index: ActionIndex,
    pub outcome: ActionOutcome,
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ActionOutcome::Completed
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            ActionOutcome::Completed => write!(f, "Action {} completed successfully", self.index),
            ActionOutcome::Failed(cause) => write!(f, "Action {} failed: {}", self.index, cause),
            ActionOutcome::Error(message) => write!(f, "Action {} error: {}", self.index, message),
        }
    }
}

/// Outcome of one workflow. Sequential results are in index order; parallel
/// and mixed results are in settle order, so read `ActionResult::index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub workflow_id: WorkflowId,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub strategy: ExecutionStrategy,
    pub status: WorkflowStatus,
    pub results: Vec<ActionResult>,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn summary(&self) -> String {
        self.results
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.successful()
    }

    pub fn result_for(&self, index: usize) -> Option<&ActionResult> {
        self.results.iter().find(|r| r.index == ActionIndex(index))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_executed: u64,
    pub successful: u64,
    pub failed: u64,
    pub workflows_run: u64,
    pub last_execution_time: Option<Duration>,
    pub average_execution_time: Duration,
    pub active_workflows: usize,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_executed: u64,
    successful: u64,
    failed: u64,
    workflows_run: u64,
    total_time: Duration,
    last_execution_time: Option<Duration>,
}

/// Runs plans to completion behind the budget gate.
pub struct WorkflowExecutor {
    runner: Arc<dyn ActionRunner>,
    oracle: Arc<dyn BudgetOracle>,
    locks: ResourceLockManager,
    active: Mutex<HashMap<WorkflowId, SharedWorkflow>>,
    metrics: Mutex<MetricsState>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        runner: Arc<dyn ActionRunner>,
        oracle: Arc<dyn BudgetOracle>,
        config: ExecutorConfig,
    ) -> Self {
        Self::with_locks(runner, oracle, ResourceLockManager::new(), config)
    }

    /// Shares an existing lock table, e.g. with another executor in the same process.
    pub fn with_locks(
        runner: Arc<dyn ActionRunner>,
        oracle: Arc<dyn BudgetOracle>,
        locks: ResourceLockManager,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            runner,
            oracle,
            locks,
            active: Mutex::new(HashMap::new()),
            metrics: Mutex::new(MetricsState::default()),
            config,
        }
    }

    pub fn locks(&self) -> &ResourceLockManager {
        &self.locks
    }

    fn active(&self) -> MutexGuard<'_, HashMap<WorkflowId, SharedWorkflow>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_state(&self) -> MutexGuard<'_, MetricsState> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits, runs and tears down one plan. Only admission denial and
    /// dispatcher failures are errors; per-action failures land in the report.
    pub async fn execute(&self, plan: Plan) -> Result<ExecutionReport, OrchestrationError> {
        let decision = self
            .oracle
            .admit(plan.orchestration.estimated_cost, OperationClass::PlanExecution);
        if !decision.allowed {
            log::warn!(
                "Plan '{}' rejected by budget oracle: {}",
                plan.name,
                decision.denial_reason()
            );
            return Err(OrchestrationError::AdmissionDenied {
                reason: decision.denial_reason().to_string(),
            });
        }

        let plan = Arc::new(plan);
        let workflow: SharedWorkflow = Arc::new(Mutex::new(Workflow::new(Arc::clone(&plan))));
        let registration = ActiveWorkflow::register(self, Arc::clone(&workflow));
        let workflow_id = registration.id;

        log::info!(
            "Workflow {} started for plan '{}' ({} actions, {} strategy)",
            workflow_id,
            plan.name,
            plan.len(),
            plan.strategy().as_str()
        );

        let started = Instant::now();
        let dispatched = match plan.strategy() {
            ExecutionStrategy::Sequential => Ok(self.run_sequential(&workflow, &plan).await),
            ExecutionStrategy::Parallel => Ok(self.run_parallel(&workflow, &plan).await),
            ExecutionStrategy::Mixed => self.run_mixed(&workflow, &plan).await,
        };

        let results = match dispatched {
            Ok(results) => {
                WorkflowStateMachine::transition(
                    &mut lock_workflow(&workflow),
                    LifecycleEvent::StrategyFinished,
                )?;
                results
            }
            Err(source) => {
                WorkflowStateMachine::transition(
                    &mut lock_workflow(&workflow),
                    LifecycleEvent::StrategyFailed,
                )?;
                log::error!("Workflow {} failed: {}", workflow_id, source);
                return Err(OrchestrationError::InvalidPlan {
                    workflow_id,
                    source,
                });
            }
        };

        let status = lock_workflow(&workflow).status;
        let report = ExecutionReport {
            workflow_id,
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            strategy: plan.strategy(),
            status,
            results,
            elapsed: started.elapsed(),
        };

        log::info!(
            "Workflow {} {}: {} succeeded, {} failed in {:?}",
            workflow_id,
            status.as_str(),
            report.successful(),
            report.failed(),
            report.elapsed
        );

        drop(registration);
        Ok(report)
    }

    async fn run_sequential(&self, workflow: &SharedWorkflow, plan: &Plan) -> Vec<ActionResult> {
        lock_workflow(workflow).pending = (0..plan.len()).map(ActionIndex).collect();

        let mut results = Vec::with_capacity(plan.len());
        loop {
            let next = {
                let mut wf = lock_workflow(workflow);
                if wf.is_running() {
                    wf.pending.pop_front()
                } else {
                    None
                }
            };
            let Some(index) = next else {
                break;
            };

            lock_workflow(workflow).current_action = index.get();
            results.push(self.run_action(workflow, plan, index, false).await);

            let more = !lock_workflow(workflow).pending.is_empty();
            if more && !self.config.action_delay().is_zero() {
                tokio::time::sleep(self.config.action_delay()).await;
            }
        }
        results
    }

    /// Launches every concurrent-capable action without dependencies.
    async fn run_parallel(&self, workflow: &SharedWorkflow, plan: &Plan) -> Vec<ActionResult> {
        let batch: Vec<ActionIndex> = plan
            .actions
            .iter()
            .filter(|a| a.is_parallelizable())
            .map(|a| a.index)
            .collect();

        lock_workflow(workflow).pending = batch.iter().copied().collect();
        self.run_batch(workflow, plan, &batch).await
    }

    /// Declared groups in order, each fully concurrent. Without groups this is
    /// the sequential strategy.
    async fn run_mixed(
        &self,
        workflow: &SharedWorkflow,
        plan: &Plan,
    ) -> Result<Vec<ActionResult>, PlanError> {
        let groups = &plan.orchestration.parallel_groups;
        if groups.is_empty() {
            log::debug!("Plan '{}' declares no parallel groups, running sequentially", plan.name);
            return Ok(self.run_sequential(workflow, plan).await);
        }

        for (group, members) in groups.iter().enumerate() {
            if let Some(&action) = members.iter().find(|i| i.get() >= plan.len()) {
                return Err(PlanError::UnknownGroupMember { group, action });
            }
        }

        lock_workflow(workflow).pending = groups.iter().flatten().copied().collect();

        let mut results = Vec::with_capacity(plan.len());
        for (position, members) in groups.iter().enumerate() {
            if position > 0 && !self.config.group_delay().is_zero() {
                tokio::time::sleep(self.config.group_delay()).await;
            }
            let running = lock_workflow(workflow).is_running();
            if !running {
                break;
            }
            results.extend(self.run_batch(workflow, plan, members).await);
        }
        Ok(results)
    }

    /// Starts the whole batch at once and collects results as they settle.
    async fn run_batch(
        &self,
        workflow: &SharedWorkflow,
        plan: &Plan,
        batch: &[ActionIndex],
    ) -> Vec<ActionResult> {
        lock_workflow(workflow)
            .pending
            .retain(|index| !batch.contains(index));

        let mut settling: FuturesUnordered<_> = batch
            .iter()
            .map(|&index| self.run_action(workflow, plan, index, true))
            .collect();

        let mut results = Vec::with_capacity(batch.len());
        while let Some(result) = settling.next().await {
            results.push(result);
        }
        results
    }

    /// Dependency check, reservation, execution, release.
    async fn run_action(
        &self,
        workflow: &SharedWorkflow,
        plan: &Plan,
        index: ActionIndex,
        concurrent: bool,
    ) -> ActionResult {
        let Some(action) = plan.action(index) else {
            let outcome = ActionOutcome::Failed("unknown action".to_string());
            return self.resolve(workflow, index, outcome);
        };

        let satisfied = {
            let mut wf = lock_workflow(workflow);
            if concurrent {
                wf.in_flight.insert(index);
            }
            dependencies_satisfied(action, &wf)
        };
        if !satisfied {
            return self.resolve(
                workflow,
                index,
                ActionOutcome::Failed("dependencies not satisfied".to_string()),
            );
        }

        let Some(reservation) = self.locks.reserve(&action.coordination.resources, workflow) else {
            return self.resolve(
                workflow,
                index,
                ActionOutcome::Failed("required resources unavailable".to_string()),
            );
        };

        let outcome = match self.runner.execute(action).await {
            Ok(true) => ActionOutcome::Completed,
            Ok(false) => {
                ActionOutcome::Failed(format!("{} runner reported failure", self.runner.name()))
            }
            Err(e) => ActionOutcome::Error(e.to_string()),
        };

        let result = self.resolve(workflow, index, outcome);
        drop(reservation);
        result
    }

    fn resolve(
        &self,
        workflow: &SharedWorkflow,
        index: ActionIndex,
        outcome: ActionOutcome,
    ) -> ActionResult {
        let mut wf = lock_workflow(workflow);
        match &outcome {
            ActionOutcome::Completed => {
                wf.mark_completed(index);
            }
            ActionOutcome::Failed(cause) | ActionOutcome::Error(cause) => {
                log::warn!("Workflow {} action {} failed: {}", wf.id, index, cause);
                wf.mark_failed(index);
            }
        }
        ActionResult { index, outcome }
    }

    /// Emergency stop: pauses every active workflow, clears their pending
    /// queues and drops every held lock in the process. Returns how many
    /// workflows were paused.
    pub fn stop(&self) -> usize {
        let workflows: Vec<SharedWorkflow> = self.active().values().cloned().collect();

        let mut paused = 0;
        for workflow in &workflows {
            let mut wf = lock_workflow(workflow);
            if WorkflowStateMachine::transition(&mut wf, LifecycleEvent::StopRequested).is_ok() {
                paused += 1;
            }
            wf.pending.clear();
            wf.held_resources.clear();
        }

        let released = self.locks.release_all();
        log::warn!(
            "Emergency stop: {} workflows paused, {} resource locks released",
            paused,
            released
        );
        paused
    }

    pub fn progress(&self) -> Vec<WorkflowProgress> {
        let now = Utc::now();
        let workflows: Vec<SharedWorkflow> = self.active().values().cloned().collect();
        workflows
            .iter()
            .map(|workflow| lock_workflow(workflow).progress_at(now))
            .collect()
    }

    pub fn active_workflows(&self) -> Vec<WorkflowId> {
        self.active().keys().copied().collect()
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        let active_workflows = self.active().len();
        let state = self.metrics_state();
        let average_execution_time = if state.workflows_run > 0 {
            state.total_time / state.workflows_run as u32
        } else {
            Duration::ZERO
        };

        ExecutionMetrics {
            total_executed: state.total_executed,
            successful: state.successful,
            failed: state.failed,
            workflows_run: state.workflows_run,
            last_execution_time: state.last_execution_time,
            average_execution_time,
            active_workflows,
        }
    }
}

/// Registration of a running workflow. Dropping it, on any exit path
/// including cancellation, releases the workflow's locks, removes it from
/// the active set and folds its counts into the metrics once.
struct ActiveWorkflow<'a> {
    executor: &'a WorkflowExecutor,
    workflow: SharedWorkflow,
    id: WorkflowId,
    started: Instant,
}

impl<'a> ActiveWorkflow<'a> {
    fn register(executor: &'a WorkflowExecutor, workflow: SharedWorkflow) -> Self {
        let id = lock_workflow(&workflow).id;
        executor.active().insert(id, Arc::clone(&workflow));
        Self {
            executor,
            workflow,
            id,
            started: Instant::now(),
        }
    }
}

impl Drop for ActiveWorkflow<'_> {
    fn drop(&mut self) {
        let held = lock_workflow(&self.workflow).held_resources.clone();
        if !held.is_empty() {
            log::debug!("Workflow {} releasing {} leftover locks", self.id, held.len());
            self.executor.locks.release(&held, &self.workflow);
        }

        self.executor.active().remove(&self.id);

        let (completed, failed) = {
            let wf = lock_workflow(&self.workflow);
            (wf.completed.len() as u64, wf.failed.len() as u64)
        };
        let elapsed = self.started.elapsed();

        let mut metrics = self.executor.metrics_state();
        metrics.total_executed += completed + failed;
        metrics.successful += completed;
        metrics.failed += failed;
        metrics.workflows_run += 1;
        metrics.total_time += elapsed;
        metrics.last_execution_time = Some(elapsed);
    }
}
