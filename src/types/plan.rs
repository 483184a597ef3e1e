use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Action, ActionIndex, ExecutionStrategy, Level, PlanId};
use crate::error::PlanError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestration {
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    #[serde(default)]
    pub estimated_duration_secs: u64,
    #[serde(default)]
    pub risk_level: Level,
    /// Budget units requested from the admission gate on submission.
    #[serde(default)]
    pub estimated_cost: u64,
    /// Rebuilt from the actions by `Plan::new`.
    #[serde(default)]
    pub dependency_map: BTreeMap<ActionIndex, Vec<ActionIndex>>,
    /// Only consulted by the mixed strategy.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<ActionIndex>>,
}

impl Default for Orchestration {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Sequential,
            estimated_duration_secs: 0,
            risk_level: Level::Medium,
            estimated_cost: 0,
            dependency_map: BTreeMap::new(),
            parallel_groups: Vec::new(),
        }
    }
}

impl Orchestration {
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_groups(mut self, groups: Vec<Vec<usize>>) -> Self {
        self.parallel_groups = groups
            .into_iter()
            .map(|group| group.into_iter().map(ActionIndex).collect())
            .collect();
        self
    }

    pub fn with_estimated_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration_secs = duration.as_secs();
        self
    }

    pub fn with_risk_level(mut self, risk_level: Level) -> Self {
        self.risk_level = risk_level;
        self
    }
}

/// Advisory scores in `0.0..=1.0`; the scheduler never reads them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    #[serde(default = "full_score")]
    pub completeness: f32,
    #[serde(default = "full_score")]
    pub cohesion: f32,
    #[serde(default = "full_score")]
    pub feasibility: f32,
}

fn full_score() -> f32 {
    1.0
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            completeness: 1.0,
            cohesion: 1.0,
            feasibility: 1.0,
        }
    }
}

/// Built only through `Plan::new` or the document loaders, which assign
/// indices and rebuild the dependency map.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub actions: Vec<Action>,
    pub orchestration: Orchestration,
    pub metrics: QualityMetrics,
    pub created_at: DateTime<Utc>,
}

/// On-disk shape of a plan before indices are assigned.
#[derive(Debug, Deserialize)]
struct PlanDocument {
    name: String,
    #[serde(default)]
    orchestration: Orchestration,
    #[serde(default)]
    metrics: QualityMetrics,
    #[serde(default)]
    actions: Vec<Action>,
}

impl Plan {
    pub fn new(name: impl Into<String>, actions: Vec<Action>, orchestration: Orchestration) -> Self {
        let mut actions = actions;
        for (position, action) in actions.iter_mut().enumerate() {
            action.index = ActionIndex(position);
            action.confidence = action.confidence.clamp(0.0, 1.0);
        }

        let mut orchestration = orchestration;
        orchestration.dependency_map = actions
            .iter()
            .map(|a| (a.index, a.dependencies.iter().copied().collect()))
            .collect();

        Self {
            id: PlanId::new_v4(),
            name: name.into(),
            actions,
            orchestration,
            metrics: QualityMetrics::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: QualityMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, PlanError> {
        let doc: PlanDocument =
            serde_yaml::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))?;
        Ok(Self::from_document(doc))
    }

    pub fn from_json_str(content: &str) -> Result<Self, PlanError> {
        let doc: PlanDocument =
            serde_json::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: PlanDocument) -> Self {
        Self::new(doc.name, doc.actions, doc.orchestration).with_metrics(doc.metrics)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action(&self, index: ActionIndex) -> Option<&Action> {
        self.actions.get(index.get())
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.orchestration.strategy
    }

    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.orchestration.estimated_duration_secs)
    }
}
