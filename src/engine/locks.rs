use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{Workflow, WorkflowId};

pub type SharedWorkflow = Arc<Mutex<Workflow>>;

pub(crate) fn lock_workflow(workflow: &SharedWorkflow) -> MutexGuard<'_, Workflow> {
    workflow.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide table of held resources. First requester wins; there is no
/// queueing, so a long-held resource can starve later requesters.
///
/// Lock order is always table, then workflow.
#[derive(Clone, Default)]
pub struct ResourceLockManager {
    held: Arc<Mutex<HashMap<String, WorkflowId>>>,
}

impl ResourceLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, WorkflowId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All-or-nothing: if any requested resource is held, nothing is acquired.
    pub fn reserve(
        &self,
        resources: &BTreeSet<String>,
        workflow: &SharedWorkflow,
    ) -> Option<ResourceReservation> {
        let mut table = self.table();

        if let Some(busy) = resources.iter().find(|r| table.contains_key(*r)) {
            log::debug!("Resource {} is already held, reservation refused", busy);
            return None;
        }

        let mut owner = lock_workflow(workflow);
        for resource in resources {
            table.insert(resource.clone(), owner.id);
            owner.held_resources.insert(resource.clone());
        }

        Some(ResourceReservation {
            manager: self.clone(),
            workflow: Arc::clone(workflow),
            resources: resources.clone(),
        })
    }

    /// Frees the named resources held by this workflow. Entries re-acquired by
    /// another workflow after an emergency stop are left alone.
    pub fn release(&self, resources: &BTreeSet<String>, workflow: &SharedWorkflow) {
        let mut table = self.table();
        let mut owner = lock_workflow(workflow);

        for resource in resources {
            if table.get(resource) == Some(&owner.id) {
                table.remove(resource);
            }
            owner.held_resources.remove(resource);
        }
    }

    /// Drops every held lock regardless of owner. Returns how many were held.
    pub fn release_all(&self) -> usize {
        let mut table = self.table();
        let count = table.len();
        table.clear();
        count
    }

    pub fn is_held(&self, resource: &str) -> bool {
        self.table().contains_key(resource)
    }

    pub fn holder(&self, resource: &str) -> Option<WorkflowId> {
        self.table().get(resource).copied()
    }

    pub fn held_count(&self) -> usize {
        self.table().len()
    }
}

/// Releases its resources when dropped, on every exit path.
pub struct ResourceReservation {
    manager: ResourceLockManager,
    workflow: SharedWorkflow,
    resources: BTreeSet<String>,
}

impl ResourceReservation {
    pub fn resources(&self) -> &BTreeSet<String> {
        &self.resources
    }
}

impl Drop for ResourceReservation {
    fn drop(&mut self) {
        if !self.resources.is_empty() {
            self.manager.release(&self.resources, &self.workflow);
        }
    }
}
