//! Integration tests for loading plan documents, analysing them and running
//! them end to end with a scripted runner.

use anyhow::Result;
use std::sync::{Arc, Mutex};

use cadence::budget::{BudgetConfig, BudgetLedger};
use cadence::engine::{analyze, validate, ExecutorConfig, WorkflowExecutor};
use cadence::runner::ActionRunner;
use cadence::{
    Action, ActionIndex, ActionKind, ExecutionStrategy, Level, Orchestration, Plan, PlanError,
    WorkflowStatus,
};

/// Mock runner that records the kind of every action it is handed.
#[derive(Default)]
struct RecordingRunner {
    seen: Mutex<Vec<&'static str>>,
}

#[async_trait::async_trait]
impl ActionRunner for RecordingRunner {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, action: &Action) -> Result<bool> {
        self.seen.lock().unwrap().push(action.kind.as_str());
        Ok(true)
    }
}

fn load_sample_plan() -> Plan {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/plans/rename-config.yaml");
    let content = std::fs::read_to_string(path).unwrap();
    Plan::from_yaml_str(&content).unwrap()
}

#[test]
fn test_load_yaml_plan() {
    let plan = load_sample_plan();

    assert_eq!(plan.name, "rename-config-loader");
    assert_eq!(plan.len(), 5);
    assert_eq!(plan.strategy(), ExecutionStrategy::Mixed);
    assert_eq!(plan.orchestration.estimated_cost, 12000);
    assert_eq!(plan.orchestration.parallel_groups.len(), 3);

    let edit = plan.action(ActionIndex(2)).unwrap();
    assert_eq!(edit.kind.target(), Some("src/config.rs"));
    assert_eq!(edit.priority, Level::High);
    assert!(edit.coordination.resources.contains("src/config.rs"));
    assert_eq!(
        plan.orchestration.dependency_map[&ActionIndex(4)],
        vec![ActionIndex(2), ActionIndex(3)]
    );
}

#[test]
fn test_load_json_plan() {
    let plan = Plan::from_json_str(
        r#"{
            "name": "probe",
            "orchestration": { "strategy": "parallel" },
            "actions": [
                { "kind": "ask_operator", "question": "Proceed?" },
                { "kind": "spawn_collaborator", "agent_type": "reviewer", "task": "review diff" }
            ]
        }"#,
    )
    .unwrap();

    assert_eq!(plan.strategy(), ExecutionStrategy::Parallel);
    assert_eq!(plan.actions[1].index, ActionIndex(1));
    assert_eq!(
        plan.actions[1].kind,
        ActionKind::SpawnCollaborator {
            agent_type: "reviewer".to_string(),
            task: "review diff".to_string(),
        }
    );
}

#[test]
fn test_unknown_action_kind_is_a_parse_error() {
    let result = Plan::from_yaml_str(
        "name: bad\nactions:\n  - kind: teleport\n    destination: mars\n",
    );
    assert!(matches!(result, Err(PlanError::Parse(_))));
}

#[test]
fn test_sample_plan_is_ready() {
    let plan = load_sample_plan();
    let analysis = analyze(&plan);

    assert!(analysis.is_ready());
    assert_eq!(analysis.parallelizable_actions, 2);
    assert!(analysis.resource_conflicts.is_empty());
    assert_eq!(
        analysis.critical_path,
        vec![ActionIndex(0), ActionIndex(2), ActionIndex(4)]
    );
    assert!(validate(&plan).is_ok());
}

#[test]
fn test_cycle_is_reported_before_execution() {
    let step = |name: &str| {
        Action::new(ActionKind::RunCommand {
            command: name.to_string(),
        })
    };
    let plan = Plan::new(
        "loop",
        vec![step("a").depends_on(2), step("b").depends_on(0), step("c").depends_on(1)],
        Orchestration::default(),
    );

    assert_eq!(validate(&plan), Err(PlanError::Cycle));
    assert!(analyze(&plan).has_cycle);

    let acyclic = Plan::new("single", vec![step("a")], Orchestration::default());
    assert!(!analyze(&acyclic).has_cycle);
    assert!(!analyze(&Plan::new("empty", vec![], Orchestration::default())).has_cycle);
}

#[tokio::test]
async fn test_sample_plan_runs_end_to_end() {
    let runner = Arc::new(RecordingRunner::default());
    let executor = WorkflowExecutor::new(
        runner.clone(),
        Arc::new(BudgetLedger::new(BudgetConfig::default())),
        ExecutorConfig::immediate(),
    );

    let report = executor.execute(load_sample_plan()).await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.successful(), 5);
    assert_eq!(report.results.last().unwrap().index, ActionIndex(4));

    let seen = runner.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen.last(), Some(&"run_command"));
    assert_eq!(executor.locks().held_count(), 0);
}
