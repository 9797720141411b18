use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single task node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling hint. Declared low to high so that `High > Medium > Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique within a plan.
    pub id: String,
    /// Which actor should run this node. Opaque to the scheduler.
    pub actor: String,
    /// Free-text payload handed to the actor.
    pub instruction: String,
    /// Ids that must complete before this node becomes ready.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskNode {
    /// Create a pending node with no dependencies.
    pub fn new(
        id: impl Into<String>,
        actor: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            actor: actor.into(),
            instruction: instruction.into(),
            dependencies: vec![],
            priority: Priority::default(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Set the dependency ids.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// `pending -> running`. Returns `false` if the node was not pending.
    pub fn mark_running(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Running;
        true
    }

    /// Record a successful result. Terminal nodes are left untouched.
    pub fn complete(&mut self, result: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.result = Some(result.into());
        true
    }

    /// Record a failure. Terminal nodes are left untouched.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        true
    }
}

/// What the plan builder decided to do with a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    #[default]
    Plan,
    DirectResponse,
}

/// Overall status of a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A task graph plus the bookkeeping the executor writes back into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub id: String,
    pub objective: String,
    #[serde(default)]
    pub outcome: PlanOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_response_content: Option<String>,
    #[serde(default)]
    pub nodes: Vec<TaskNode>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WorkflowPlan {
    /// Create an executable plan with a fresh id.
    pub fn new(objective: impl Into<String>, nodes: Vec<TaskNode>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            objective: objective.into(),
            outcome: PlanOutcome::Plan,
            direct_response_content: None,
            nodes,
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Create a plan that answers the request without scheduling anything.
    pub fn direct_response(objective: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            outcome: PlanOutcome::DirectResponse,
            direct_response_content: Some(content.into()),
            ..Self::new(objective, vec![])
        }
    }

    pub fn is_direct_response(&self) -> bool {
        self.outcome == PlanOutcome::DirectResponse
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    /// True once no node is pending or running.
    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    /// `100 * completed / total`. A plan with no nodes counts as fully complete.
    pub fn completion_percentage(&self) -> f64 {
        if self.nodes.is_empty() {
            return 100.0;
        }
        let completed = self.count_with_status(TaskStatus::Completed);
        completed as f64 * 100.0 / self.nodes.len() as f64
    }

    /// Node id -> result for every node holding one.
    pub fn results(&self) -> BTreeMap<String, String> {
        self.nodes
            .iter()
            .filter_map(|n| n.result.as_ref().map(|r| (n.id.clone(), r.clone())))
            .collect()
    }

    /// Visualization projection of the current node/edge state.
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .nodes
            .iter()
            .map(|n| SnapshotNode {
                id: n.id.clone(),
                actor: n.actor.clone(),
                instruction: n.instruction.clone(),
                priority: n.priority,
                status: n.status,
            })
            .collect();

        let edges = self
            .nodes
            .iter()
            .flat_map(|n| {
                n.dependencies.iter().map(move |dep| SnapshotEdge {
                    id: format!("{}->{}", dep, n.id),
                    source: dep.clone(),
                    target: n.id.clone(),
                })
            })
            .collect();

        GraphSnapshot { nodes, edges }
    }
}

/// Node/edge view of a plan, shaped for graph renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<SnapshotNode>,
    pub edges: Vec<SnapshotEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: String,
    pub actor: String,
    pub instruction: String,
    pub priority: Priority,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// What an actor hands back for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorOutput {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_component: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
}

impl ActorOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_ui_component(mut self, component: serde_json::Value) -> Self {
        self.ui_component = Some(component);
        self
    }

    pub fn with_message(mut self, message: serde_json::Value) -> Self {
        self.message = Some(message);
        self
    }
}

/// Key under which a node's completed dependency results are exposed.
pub const UPSTREAM_RESULTS_KEY: &str = "upstream_results";

/// Context map handed to actors.
///
/// Keys are strings; values are JSON so callers can pass anything through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorContext {
    data: HashMap<String, serde_json::Value>,
}

impl ActorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(data: HashMap<String, serde_json::Value>) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Merge another context into this one (overwrites on conflict).
    pub fn merge(&mut self, other: &ActorContext) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Results of upstream nodes, if the executor attached any.
    pub fn upstream_results(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.data.get(UPSTREAM_RESULTS_KEY).and_then(|v| v.as_object())
    }

    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
