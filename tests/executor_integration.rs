//! Integration tests for plan execution: ordering, resource locking,
//! admission, emergency stop and progress reporting.

use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence::budget::{BudgetConfig, BudgetLedger};
use cadence::engine::{
    ActionOutcome, ExecutorConfig, ResourceLockManager, SharedWorkflow, WorkflowExecutor,
};
use cadence::runner::{ActionRunner, SimulatedRunner};
use cadence::{
    Action, ActionIndex, ActionKind, ExecutionStrategy, Orchestration, OrchestrationError, Plan,
    Workflow, WorkflowStatus,
};

/// Mock runner that sleeps per action and tracks how many actions hold each
/// resource at the same time.
#[derive(Default)]
struct TrackingRunner {
    latencies: HashMap<usize, Duration>,
    errors: HashSet<usize>,
    holders: Mutex<HashMap<String, usize>>,
    max_holders: Mutex<HashMap<String, usize>>,
    started: Mutex<Vec<usize>>,
}

impl TrackingRunner {
    fn with_latency(mut self, index: usize, millis: u64) -> Self {
        self.latencies.insert(index, Duration::from_millis(millis));
        self
    }

    fn with_error(mut self, index: usize) -> Self {
        self.errors.insert(index);
        self
    }

    fn max_holders(&self, resource: &str) -> usize {
        self.max_holders
            .lock()
            .unwrap()
            .get(resource)
            .copied()
            .unwrap_or(0)
    }

    fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ActionRunner for TrackingRunner {
    fn name(&self) -> &str {
        "tracking"
    }

    async fn execute(&self, action: &Action) -> Result<bool> {
        let index = action.index.get();
        self.started.lock().unwrap().push(index);

        {
            let mut holders = self.holders.lock().unwrap();
            let mut max = self.max_holders.lock().unwrap();
            for resource in &action.coordination.resources {
                let count = holders.entry(resource.clone()).or_default();
                *count += 1;
                let peak = max.entry(resource.clone()).or_default();
                *peak = (*peak).max(*count);
            }
        }

        if let Some(latency) = self.latencies.get(&index) {
            tokio::time::sleep(*latency).await;
        }

        {
            let mut holders = self.holders.lock().unwrap();
            for resource in &action.coordination.resources {
                if let Some(count) = holders.get_mut(resource) {
                    *count -= 1;
                }
            }
        }

        if self.errors.contains(&index) {
            return Err(anyhow!("runner crashed on action {}", index));
        }
        Ok(true)
    }
}

fn create_test_ledger() -> Arc<BudgetLedger> {
    Arc::new(BudgetLedger::new(BudgetConfig::default()))
}

fn create_test_executor(runner: Arc<dyn ActionRunner>) -> WorkflowExecutor {
    WorkflowExecutor::new(runner, create_test_ledger(), ExecutorConfig::immediate())
}

fn edit(target: &str) -> Action {
    Action::new(ActionKind::ModifyArtifact {
        target: target.to_string(),
        description: format!("update {}", target),
    })
}

fn resources(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn create_test_workflow() -> SharedWorkflow {
    let plan = Plan::new("holder", vec![], Orchestration::default());
    Arc::new(Mutex::new(Workflow::new(Arc::new(plan))))
}

#[tokio::test]
async fn test_sequential_reports_in_index_order() {
    let runner = Arc::new(
        TrackingRunner::default()
            .with_latency(0, 40)
            .with_latency(1, 5)
            .with_latency(2, 20),
    );
    let executor = create_test_executor(runner.clone());
    let plan = Plan::new(
        "ordering",
        vec![edit("a.rs"), edit("b.rs"), edit("c.rs")],
        Orchestration::new(ExecutionStrategy::Sequential),
    );

    let report = executor.execute(plan).await.unwrap();

    let order: Vec<usize> = report.results.iter().map(|r| r.index.get()).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(runner.started(), vec![0, 1, 2]);
    assert_eq!(
        report.summary(),
        "Action 0 completed successfully\n\
         Action 1 completed successfully\n\
         Action 2 completed successfully"
    );
}

#[tokio::test]
async fn test_dependent_actions_share_resource_in_sequence() {
    let executor = create_test_executor(Arc::new(TrackingRunner::default()));
    let plan = Plan::new(
        "shared-resource",
        vec![edit("lib.rs").requires("r1"), edit("lib.rs").requires("r1").depends_on(0)],
        Orchestration::new(ExecutionStrategy::Sequential),
    );

    let report = executor.execute(plan).await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.successful(), 2);
    assert_eq!(report.results[0].index, ActionIndex(0));
    assert_eq!(report.results[1].index, ActionIndex(1));
    assert!(!executor.locks().is_held("r1"));
}

#[tokio::test]
async fn test_parallel_actions_never_share_a_resource() {
    let runner = Arc::new(
        TrackingRunner::default()
            .with_latency(0, 30)
            .with_latency(1, 30)
            .with_latency(2, 30),
    );
    let executor = create_test_executor(runner.clone());
    let plan = Plan::new(
        "contended",
        vec![
            edit("a").requires("db").concurrent(true),
            edit("b").requires("db").concurrent(true),
            edit("c").requires("cache").concurrent(true),
        ],
        Orchestration::new(ExecutionStrategy::Parallel),
    );

    let report = executor.execute(plan).await.unwrap();

    assert_eq!(runner.max_holders("db"), 1);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.successful(), 2);

    let refused: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.outcome == ActionOutcome::Failed("required resources unavailable".to_string()))
        .collect();
    assert_eq!(refused.len(), 1);
    assert_eq!(executor.locks().held_count(), 0);
}

#[tokio::test]
async fn test_failed_action_leaks_no_locks() {
    let runner = Arc::new(TrackingRunner::default().with_latency(0, 10).with_error(0));
    let executor = create_test_executor(runner);
    let plan = Plan::new(
        "crash",
        vec![
            edit("a").requires("db").requires("queue").concurrent(true),
            edit("b").requires("cache").concurrent(true),
        ],
        Orchestration::new(ExecutionStrategy::Parallel),
    );

    let report = executor.execute(plan).await.unwrap();

    let crashed = report.result_for(0).unwrap();
    assert_eq!(
        crashed.to_string(),
        "Action 0 error: runner crashed on action 0"
    );
    assert_eq!(executor.locks().held_count(), 0);
    assert!(executor.active_workflows().is_empty());
}

#[test]
fn test_reservation_is_all_or_nothing() {
    let locks = ResourceLockManager::new();
    let holder = create_test_workflow();
    let requester = create_test_workflow();

    let held = locks.reserve(&resources(&["x"]), &holder).unwrap();
    assert!(locks.reserve(&resources(&["x", "y"]), &requester).is_none());

    assert!(!locks.is_held("y"));
    assert!(requester.lock().unwrap().held_resources.is_empty());

    drop(held);
    assert!(!locks.is_held("x"));
    assert!(locks.reserve(&resources(&["x", "y"]), &requester).is_some());
}

#[tokio::test]
async fn test_lock_held_elsewhere_fails_action() {
    let locks = ResourceLockManager::new();
    let external = create_test_workflow();
    let _held = locks.reserve(&resources(&["deploy"]), &external).unwrap();

    let executor = WorkflowExecutor::with_locks(
        Arc::new(SimulatedRunner::default()),
        create_test_ledger(),
        locks.clone(),
        ExecutorConfig::immediate(),
    );
    let plan = Plan::new(
        "blocked",
        vec![edit("release.sh").requires("deploy")],
        Orchestration::default(),
    );

    let report = executor.execute(plan).await.unwrap();

    assert_eq!(
        report.summary(),
        "Action 0 failed: required resources unavailable"
    );
    let owner = external.lock().unwrap().id;
    assert_eq!(locks.holder("deploy"), Some(owner));
}

#[tokio::test]
async fn test_admission_denial_carries_reason() {
    let ledger = create_test_ledger();
    ledger.trigger_shutdown();
    let executor = WorkflowExecutor::new(
        Arc::new(SimulatedRunner::default()),
        ledger.clone(),
        ExecutorConfig::immediate(),
    );

    let plan = Plan::new("denied", vec![edit("a")], Orchestration::default());
    let err = executor.execute(plan).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "plan submission rejected: Emergency shutdown active: token budget exhausted"
    );
    assert_eq!(executor.metrics().workflows_run, 0);

    assert!(ledger.clear_shutdown());
    let retry = Plan::new("retry", vec![edit("a")], Orchestration::default());
    assert!(executor.execute(retry).await.is_ok());
}

#[tokio::test]
async fn test_plan_over_quota_is_rejected() {
    let ledger = Arc::new(BudgetLedger::new(BudgetConfig {
        daily_quota: 1000,
        ..BudgetConfig::default()
    }));
    let executor = WorkflowExecutor::new(
        Arc::new(SimulatedRunner::default()),
        ledger,
        ExecutorConfig::immediate(),
    );

    let plan = Plan::new(
        "expensive",
        vec![edit("a")],
        Orchestration::default().with_estimated_cost(5000),
    );

    match executor.execute(plan).await {
        Err(OrchestrationError::AdmissionDenied { reason }) => {
            assert!(reason.starts_with("Request would exceed daily quota"));
        }
        other => panic!("expected admission denial, got {:?}", other.map(|r| r.status)),
    }
}

#[tokio::test]
async fn test_stop_pauses_running_workflow() {
    let executor = Arc::new(WorkflowExecutor::new(
        Arc::new(SimulatedRunner::new(Duration::from_millis(100))),
        create_test_ledger(),
        ExecutorConfig::immediate(),
    ));
    let plan = Plan::new(
        "long",
        (0..5).map(|i| edit(&format!("step{}.rs", i)).requires("repo")).collect(),
        Orchestration::new(ExecutionStrategy::Sequential),
    );

    let running = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.execute(plan).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(executor.stop(), 1);
    assert_eq!(executor.locks().held_count(), 0);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.status, WorkflowStatus::Paused);
    assert!(report.results.len() < 5);
    assert!(executor.active_workflows().is_empty());
    assert_eq!(executor.locks().held_count(), 0);
}

#[tokio::test]
async fn test_progress_of_active_workflow() {
    let executor = Arc::new(WorkflowExecutor::new(
        Arc::new(SimulatedRunner::new(Duration::from_millis(80))),
        create_test_ledger(),
        ExecutorConfig::immediate(),
    ));
    let plan = Plan::new(
        "observed",
        vec![edit("a"), edit("b")],
        Orchestration::new(ExecutionStrategy::Sequential)
            .with_estimated_duration(Duration::from_secs(60)),
    );

    let running = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.execute(plan).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    let progress = executor.progress();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].plan_name, "observed");
    assert_eq!(progress[0].status, WorkflowStatus::Running);
    assert_eq!(progress[0].progress, 0.0);
    assert_eq!(progress[0].estimated_remaining, Duration::from_secs(60));

    running.await.unwrap().unwrap();
    assert!(executor.progress().is_empty());
    assert_eq!(executor.metrics().successful, 2);
}

#[tokio::test]
async fn test_mixed_runs_groups_in_order() {
    let runner = Arc::new(
        TrackingRunner::default()
            .with_latency(0, 20)
            .with_latency(1, 5),
    );
    let executor = create_test_executor(runner.clone());
    let plan = Plan::new(
        "groups",
        vec![
            edit("a"),
            edit("b"),
            edit("c").depends_on(0),
            edit("d").depends_on(1),
        ],
        Orchestration::new(ExecutionStrategy::Mixed).with_groups(vec![vec![0, 1], vec![2, 3]]),
    );

    let report = executor.execute(plan).await.unwrap();

    assert_eq!(report.successful(), 4);
    let first: HashSet<usize> = report.results[..2].iter().map(|r| r.index.get()).collect();
    let second: HashSet<usize> = report.results[2..].iter().map(|r| r.index.get()).collect();
    assert_eq!(first, HashSet::from([0, 1]));
    assert_eq!(second, HashSet::from([2, 3]));

    // The shorter action in the first group settles first.
    assert_eq!(report.results[0].index, ActionIndex(1));
}

#[tokio::test]
async fn test_mixed_without_groups_runs_sequentially() {
    let executor = create_test_executor(Arc::new(TrackingRunner::default()));
    let plan = Plan::new(
        "no-groups",
        vec![edit("a"), edit("b").depends_on(0)],
        Orchestration::new(ExecutionStrategy::Mixed),
    );

    let report = executor.execute(plan).await.unwrap();
    let order: Vec<usize> = report.results.iter().map(|r| r.index.get()).collect();
    assert_eq!(order, vec![0, 1]);
    assert_eq!(report.successful(), 2);
}
