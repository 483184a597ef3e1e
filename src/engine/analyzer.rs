use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::dependencies::{critical_path, detect_cycle, validate_references};
use crate::error::PlanError;
use crate::types::{ActionIndex, ExecutionStrategy, Level, Plan};

const MAX_RESOURCES_PER_ACTION: usize = 3;
const LOW_FEASIBILITY: f32 = 0.6;
const LOW_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConflict {
    pub resource: String,
    pub actions: Vec<ActionIndex>,
}

/// Read-only diagnostics for a plan. Nothing here is enforced at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationAnalysis {
    pub parallelizable_actions: usize,
    pub resource_conflicts: Vec<ResourceConflict>,
    pub critical_path: Vec<ActionIndex>,
    pub has_cycle: bool,
    pub issues: Vec<PlanError>,
    pub suggestions: Vec<String>,
}

impl OrchestrationAnalysis {
    pub fn is_ready(&self) -> bool {
        !self.has_cycle && self.issues.is_empty()
    }
}

pub fn analyze(plan: &Plan) -> OrchestrationAnalysis {
    let resource_conflicts = resource_conflicts(plan);
    let has_cycle = detect_cycle(&plan.actions);

    OrchestrationAnalysis {
        parallelizable_actions: parallelizable_count(plan),
        critical_path: critical_path(&plan.actions),
        has_cycle,
        issues: structural_issues(plan),
        suggestions: suggestions(plan, &resource_conflicts),
        resource_conflicts,
    }
}

/// First structural issue, then cycles.
pub fn validate(plan: &Plan) -> Result<(), PlanError> {
    validate_references(&plan.actions)?;
    if let Some(issue) = structural_issues(plan).into_iter().next() {
        return Err(issue);
    }
    if detect_cycle(&plan.actions) {
        return Err(PlanError::Cycle);
    }
    Ok(())
}

pub fn parallelizable_count(plan: &Plan) -> usize {
    plan.actions.iter().filter(|a| a.is_parallelizable()).count()
}

/// A resource shared by several actions conflicts unless every one of them is
/// concurrent-capable. The lock manager still serializes those at run time.
pub fn resource_conflicts(plan: &Plan) -> Vec<ResourceConflict> {
    let mut requesters: BTreeMap<&str, Vec<ActionIndex>> = BTreeMap::new();
    for action in &plan.actions {
        for resource in &action.coordination.resources {
            requesters.entry(resource.as_str()).or_default().push(action.index);
        }
    }

    requesters
        .into_iter()
        .filter(|(_, actions)| actions.len() > 1)
        .filter(|(_, actions)| {
            !actions
                .iter()
                .filter_map(|&i| plan.action(i))
                .all(|a| a.coordination.concurrent)
        })
        .map(|(resource, actions)| ResourceConflict {
            resource: resource.to_string(),
            actions,
        })
        .collect()
}

fn structural_issues(plan: &Plan) -> Vec<PlanError> {
    let mut issues = Vec::new();

    for action in &plan.actions {
        for &dep in &action.dependencies {
            if dep == action.index {
                issues.push(PlanError::SelfDependency {
                    action: action.index,
                });
            } else if dep.get() >= plan.len() {
                issues.push(PlanError::UnknownDependency {
                    action: action.index,
                    dependency: dep,
                });
            }
        }
    }

    if plan.strategy() == ExecutionStrategy::Mixed {
        for (group, members) in plan.orchestration.parallel_groups.iter().enumerate() {
            for &action in members.iter().filter(|i| i.get() >= plan.len()) {
                issues.push(PlanError::UnknownGroupMember { group, action });
            }
        }
    }

    issues
}

fn suggestions(plan: &Plan, conflicts: &[ResourceConflict]) -> Vec<String> {
    let mut hints = Vec::new();

    let independent = plan.actions.iter().filter(|a| !a.has_dependencies()).count();
    if plan.strategy() == ExecutionStrategy::Sequential && independent > 1 {
        hints.push(format!(
            "{} actions have no dependencies; a parallel or mixed strategy could run them together",
            independent
        ));
    }

    for action in &plan.actions {
        let count = action.coordination.resources.len();
        if count > MAX_RESOURCES_PER_ACTION {
            hints.push(format!(
                "Action {} requires {} resources; consider splitting it to reduce lock contention",
                action.index, count
            ));
        }
        if action.confidence < LOW_CONFIDENCE {
            hints.push(format!(
                "Action {} has low confidence ({:.2}); consider an operator checkpoint before it",
                action.index, action.confidence
            ));
        }
    }

    for conflict in conflicts {
        let actions: Vec<String> = conflict.actions.iter().map(|i| i.to_string()).collect();
        hints.push(format!(
            "Resource '{}' is contended by actions {}; sequence them explicitly",
            conflict.resource,
            actions.join(", ")
        ));
    }

    if plan.orchestration.risk_level == Level::High {
        hints.push("High risk plan: add review checkpoints between groups".to_string());
    }

    if plan.metrics.feasibility < LOW_FEASIBILITY {
        hints.push(format!(
            "Low implementation feasibility ({:.2}); consider breaking the plan into smaller plans",
            plan.metrics.feasibility
        ));
    }

    hints
}
