use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{GraphSnapshot, SnapshotEdge, SnapshotNode, WorkflowStatus};

/// Progress events emitted while a workflow executes.
///
/// Serialized with a `type` discriminator so observers can dispatch on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStart {
        workflow_id: String,
        objective: String,
        total_tasks: usize,
    },
    /// Snapshot of the graph, re-emitted after every state change.
    WorkflowUpdate {
        nodes: Vec<SnapshotNode>,
        edges: Vec<SnapshotEdge>,
    },
    AgentStart {
        task_id: String,
        agent: String,
        instruction: String,
    },
    /// `output` may be truncated; the node keeps the full result.
    AgentFinish {
        task_id: String,
        agent: String,
        output: String,
    },
    AgentError {
        task_id: String,
        agent: String,
        error: String,
    },
    UiComponent {
        task_id: String,
        component: serde_json::Value,
    },
    Message {
        task_id: String,
        message: serde_json::Value,
    },
    WorkflowComplete {
        workflow_id: String,
        status: WorkflowStatus,
        completion: f64,
        results: BTreeMap<String, String>,
    },
}

impl WorkflowEvent {
    pub fn update(snapshot: GraphSnapshot) -> Self {
        Self::WorkflowUpdate {
            nodes: snapshot.nodes,
            edges: snapshot.edges,
        }
    }

    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkflowStart { .. } => "workflow_start",
            Self::WorkflowUpdate { .. } => "workflow_update",
            Self::AgentStart { .. } => "agent_start",
            Self::AgentFinish { .. } => "agent_finish",
            Self::AgentError { .. } => "agent_error",
            Self::UiComponent { .. } => "ui_component",
            Self::Message { .. } => "message",
            Self::WorkflowComplete { .. } => "workflow_complete",
        }
    }
}

/// Single-producer handle for a workflow's event stream.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<WorkflowEvent>>,
}

impl EventEmitter {
    /// Create an emitter and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An emitter that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: WorkflowEvent) {
        if let Some(ref tx) = self.tx {
            // Ignore error if the observer went away
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tag() {
        let event = WorkflowEvent::AgentStart {
            task_id: "a".into(),
            agent: "contract".into(),
            instruction: "read it".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent_start");
        assert_eq!(json["task_id"], "a");
        assert_eq!(event.kind(), "agent_start");
    }

    #[test]
    fn test_complete_event_shape() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), "done".to_string());
        let event = WorkflowEvent::WorkflowComplete {
            workflow_id: "wf".into(),
            status: WorkflowStatus::Completed,
            completion: 100.0,
            results,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "workflow_complete");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["completion"], 100.0);
        assert_eq!(json["results"]["a"], "done");
    }

    #[tokio::test]
    async fn test_emitter_delivers_in_order() {
        let (emitter, mut rx) = EventEmitter::channel();
        emitter.emit(WorkflowEvent::WorkflowStart {
            workflow_id: "wf".into(),
            objective: "x".into(),
            total_tasks: 0,
        });
        emitter.emit(WorkflowEvent::update(GraphSnapshot {
            nodes: vec![],
            edges: vec![],
        }));
        drop(emitter);

        assert_eq!(rx.recv().await.unwrap().kind(), "workflow_start");
        assert_eq!(rx.recv().await.unwrap().kind(), "workflow_update");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (emitter, rx) = EventEmitter::channel();
        drop(rx);
        emitter.emit(WorkflowEvent::update(GraphSnapshot {
            nodes: vec![],
            edges: vec![],
        }));
        EventEmitter::disabled().emit(WorkflowEvent::update(GraphSnapshot {
            nodes: vec![],
            edges: vec![],
        }));
    }
}
