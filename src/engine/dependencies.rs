use std::collections::{HashMap, HashSet};

use crate::error::PlanError;
use crate::types::{Action, ActionIndex, Workflow};

/// True iff every dependency of `action` is in the workflow's completed set.
/// Self-references and unknown indices are never completed, so they stay unmet.
pub fn dependencies_satisfied(action: &Action, workflow: &Workflow) -> bool {
    action
        .dependencies
        .iter()
        .all(|dep| workflow.completed.contains(dep))
}

/// Dependencies that point at the action itself or outside the plan.
pub fn validate_references(actions: &[Action]) -> Result<(), PlanError> {
    for (position, action) in actions.iter().enumerate() {
        let index = ActionIndex(position);
        for &dep in &action.dependencies {
            if dep == index {
                return Err(PlanError::SelfDependency { action: index });
            }
            if dep.get() >= actions.len() {
                return Err(PlanError::UnknownDependency {
                    action: index,
                    dependency: dep,
                });
            }
        }
    }
    Ok(())
}

/// Edges that `validate_references` accepts.
fn valid_edges(actions: &[Action], index: usize) -> impl Iterator<Item = usize> + '_ {
    actions[index]
        .dependencies
        .iter()
        .map(|dep| dep.get())
        .filter(move |&dep| dep != index && dep < actions.len())
}

/// Depth-first search for a back edge, restarted from each unvisited action.
/// Self-loops and unknown indices are structural errors, reported by
/// `validate_references` rather than here.
pub fn detect_cycle(actions: &[Action]) -> bool {
    let mut visited = vec![false; actions.len()];
    let mut on_stack = vec![false; actions.len()];

    for start in 0..actions.len() {
        if !visited[start] && visit(actions, start, &mut visited, &mut on_stack) {
            return true;
        }
    }
    false
}

fn visit(actions: &[Action], node: usize, visited: &mut [bool], on_stack: &mut [bool]) -> bool {
    visited[node] = true;
    on_stack[node] = true;

    for dep in valid_edges(actions, node) {
        if on_stack[dep] {
            return true;
        }
        if !visited[dep] && visit(actions, dep, visited, on_stack) {
            return true;
        }
    }

    on_stack[node] = false;
    false
}

/// Longest dependency chain in the plan, ordered from the first action to run
/// to the last. Ties go to the lowest index.
pub fn critical_path(actions: &[Action]) -> Vec<ActionIndex> {
    let mut best: Vec<usize> = Vec::new();
    let mut memo = HashMap::new();

    for index in 0..actions.len() {
        let mut on_path = HashSet::new();
        let chain = longest_chain(actions, index, &mut memo, &mut on_path);
        if chain.len() > best.len() {
            best = chain;
        }
    }

    best.into_iter().map(ActionIndex).collect()
}

/// Longest chain ending at `index`. Finished chains are memoized; `on_path`
/// only cuts back edges so cyclic plans still terminate.
fn longest_chain(
    actions: &[Action],
    index: usize,
    memo: &mut HashMap<usize, Vec<usize>>,
    on_path: &mut HashSet<usize>,
) -> Vec<usize> {
    if let Some(chain) = memo.get(&index) {
        return chain.clone();
    }
    if !on_path.insert(index) {
        return Vec::new();
    }

    let mut longest: Vec<usize> = Vec::new();
    for dep in valid_edges(actions, index) {
        let chain = longest_chain(actions, dep, memo, on_path);
        if chain.len() > longest.len() {
            longest = chain;
        }
    }

    longest.push(index);
    on_path.remove(&index);
    memo.insert(index, longest.clone());
    longest
}
