use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::Level;

/// Position of an action inside its plan. Assigned once by `Plan::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionIndex(pub usize);

impl ActionIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl From<usize> for ActionIndex {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for ActionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    ModifyArtifact { target: String, description: String },
    CreateArtifact { target: String, description: String },
    DeleteArtifact { target: String },
    RunCommand { command: String },
    AskOperator { question: String },
    DiagnoseIssue { symptom: String },
    SpawnCollaborator { agent_type: String, task: String },
    Research { query: String },
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ModifyArtifact { .. } => "modify_artifact",
            ActionKind::CreateArtifact { .. } => "create_artifact",
            ActionKind::DeleteArtifact { .. } => "delete_artifact",
            ActionKind::RunCommand { .. } => "run_command",
            ActionKind::AskOperator { .. } => "ask_operator",
            ActionKind::DiagnoseIssue { .. } => "diagnose_issue",
            ActionKind::SpawnCollaborator { .. } => "spawn_collaborator",
            ActionKind::Research { .. } => "research",
        }
    }

    /// The artifact this action touches, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            ActionKind::ModifyArtifact { target, .. }
            | ActionKind::CreateArtifact { target, .. }
            | ActionKind::DeleteArtifact { target } => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordination {
    /// May run alongside unrelated actions under the parallel and mixed strategies.
    #[serde(default)]
    pub concurrent: bool,
    /// Named resources this action needs exclusive access to.
    #[serde(default)]
    pub resources: BTreeSet<String>,
    /// Informational only; never enforced by the scheduler.
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub index: ActionIndex,
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub dependencies: BTreeSet<ActionIndex>,
    #[serde(default)]
    pub coordination: Coordination,
    #[serde(default)]
    pub priority: Level,
    #[serde(default)]
    pub impact: Level,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            index: ActionIndex::default(),
            kind,
            summary: String::new(),
            dependencies: BTreeSet::new(),
            coordination: Coordination::default(),
            priority: Level::default(),
            impact: Level::default(),
            confidence: default_confidence(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<ActionIndex>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn requires(mut self, resource: impl Into<String>) -> Self {
        self.coordination.resources.insert(resource.into());
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.coordination.concurrent = concurrent;
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.coordination.constraints.push(constraint.into());
        self
    }

    pub fn with_priority(mut self, priority: Level) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_impact(mut self, impact: Level) -> Self {
        self.impact = impact;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// Concurrent-capable with nothing to wait for.
    pub fn is_parallelizable(&self) -> bool {
        self.coordination.concurrent && self.dependencies.is_empty()
    }
}
