use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use covenant_core::config::PlannerConfig;
use covenant_core::error::{CovenantError, Result};
use covenant_core::traits::PlanGenerator;
use covenant_core::types::{ActorContext, PlanOutcome, Priority, TaskNode, WorkflowPlan};

/// Plan as it comes out of the generator, before validation.
#[derive(Debug, Deserialize)]
struct PlanDraft {
    #[serde(default)]
    outcome: PlanOutcome,
    #[serde(default)]
    objective: Option<String>,
    #[serde(default, alias = "response")]
    direct_response_content: Option<String>,
    #[serde(default, alias = "tasks")]
    nodes: Vec<NodeDraft>,
}

#[derive(Debug, Deserialize)]
struct NodeDraft {
    id: String,
    #[serde(alias = "agent")]
    actor: String,
    #[serde(alias = "task", alias = "description")]
    instruction: String,
    #[serde(default, alias = "depends_on")]
    dependencies: Vec<String>,
    #[serde(default)]
    priority: Priority,
}

/// Turns a request into a `WorkflowPlan`.
///
/// Malformed generator output never escapes: it is replaced by a single-node
/// fallback plan so the executor always receives a structurally valid graph.
pub struct PlanBuilder {
    generator: Arc<dyn PlanGenerator>,
    config: PlannerConfig,
}

impl PlanBuilder {
    pub fn new(generator: Arc<dyn PlanGenerator>, config: PlannerConfig) -> Self {
        Self { generator, config }
    }

    /// Restrict generated plans to these actor ids.
    pub fn with_known_actors(mut self, actors: Vec<String>) -> Self {
        self.config.known_actors = actors;
        self
    }

    /// Generate and validate a plan. Only generator errors propagate.
    pub async fn build(&self, request: &str, context: &ActorContext) -> Result<WorkflowPlan> {
        debug!(request_len = request.len(), "Generating plan");
        let raw = self.generator.generate(request, context).await?;
        Ok(self.parse_plan(&raw, request))
    }

    /// Parse raw generator text into a plan, falling back on any defect.
    pub fn parse_plan(&self, raw: &str, request: &str) -> WorkflowPlan {
        match self.try_parse(raw, request) {
            Ok(plan) => {
                info!(
                    workflow_id = %plan.id,
                    outcome = ?plan.outcome,
                    tasks = plan.nodes.len(),
                    "Plan built"
                );
                plan
            }
            Err(e) => {
                warn!(error = %e, "Plan output rejected, using fallback plan");
                self.fallback_plan(request)
            }
        }
    }

    /// One high-priority node that hands the whole request to the fallback actor.
    pub fn fallback_plan(&self, request: &str) -> WorkflowPlan {
        let node = TaskNode::new("task_1", self.config.fallback_actor.clone(), request)
            .with_priority(Priority::High);
        WorkflowPlan::new(request, vec![node])
    }

    fn try_parse(&self, raw: &str, request: &str) -> Result<WorkflowPlan> {
        let json = extract_json(raw);
        let draft: PlanDraft =
            serde_json::from_str(json).map_err(|e| CovenantError::PlanParse(e.to_string()))?;

        let objective = draft
            .objective
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| request.to_string());

        if draft.outcome == PlanOutcome::DirectResponse {
            let content = draft
                .direct_response_content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| {
                    CovenantError::PlanParse("direct response without content".into())
                })?;
            return Ok(WorkflowPlan::direct_response(objective, content));
        }

        self.validate(&draft.nodes)?;

        let nodes = draft
            .nodes
            .into_iter()
            .map(|n| {
                TaskNode::new(n.id, n.actor, n.instruction)
                    .with_dependencies(n.dependencies)
                    .with_priority(n.priority)
            })
            .collect();
        Ok(WorkflowPlan::new(objective, nodes))
    }

    fn validate(&self, nodes: &[NodeDraft]) -> Result<()> {
        if nodes.is_empty() {
            return Err(CovenantError::PlanParse("plan has no tasks".into()));
        }

        let mut ids = HashSet::new();
        for node in nodes {
            if node.id.trim().is_empty() {
                return Err(CovenantError::PlanParse("task with empty id".into()));
            }
            if !ids.insert(node.id.as_str()) {
                return Err(CovenantError::PlanParse(format!("duplicate task id '{}'", node.id)));
            }
            if node.actor.trim().is_empty() || node.instruction.trim().is_empty() {
                return Err(CovenantError::PlanParse(format!(
                    "task '{}' is missing an actor or instruction",
                    node.id
                )));
            }
            if !self.config.known_actors.is_empty() && !self.config.known_actors.contains(&node.actor) {
                return Err(CovenantError::PlanParse(format!(
                    "task '{}' uses unknown actor '{}'",
                    node.id, node.actor
                )));
            }
        }

        for node in nodes {
            if let Some(dep) = node.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(CovenantError::PlanParse(format!(
                    "task '{}' depends on unknown task '{}'",
                    node.id, dep
                )));
            }
        }
        Ok(())
    }
}

/// Extract JSON from a response that may contain markdown code fences.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::types::TaskStatus;
    use covenant_test_utils::StaticGenerator;

    fn builder(raw: &str) -> PlanBuilder {
        PlanBuilder::new(Arc::new(StaticGenerator::new(raw)), PlannerConfig::default())
    }

    fn assert_fallback(plan: &WorkflowPlan, request: &str) {
        assert_eq!(plan.outcome, PlanOutcome::Plan);
        assert_eq!(plan.nodes.len(), 1);
        let node = &plan.nodes[0];
        assert_eq!(node.id, "task_1");
        assert_eq!(node.actor, "general");
        assert_eq!(node.instruction, request);
        assert!(node.dependencies.is_empty());
        assert_eq!(node.priority, Priority::High);
        assert_eq!(node.status, TaskStatus::Pending);
    }

    #[test]
    fn test_extract_json_code_fence() {
        let input = "Here is the plan:\n```json\n{\"nodes\": []}\n```";
        assert_eq!(extract_json(input), "{\"nodes\": []}");
    }

    #[test]
    fn test_extract_json_with_text() {
        let input = r#"Sure: {"outcome": "plan"} hope that helps"#;
        assert_eq!(extract_json(input), r#"{"outcome": "plan"}"#);
    }

    #[test]
    fn test_parse_valid_plan() {
        let raw = r#"{
            "outcome": "plan",
            "objective": "Protect the freelancer on a late invoice",
            "tasks": [
                {"id": "review", "agent": "contract", "instruction": "Find the payment terms"},
                {"id": "letter", "agent": "writer", "instruction": "Draft a reminder",
                 "depends_on": ["review"], "priority": "high"}
            ]
        }"#;
        let plan = builder(raw).parse_plan(raw, "help me get paid");
        assert_eq!(plan.objective, "Protect the freelancer on a late invoice");
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.nodes[1].actor, "writer");
        assert_eq!(plan.nodes[1].dependencies, vec!["review"]);
        assert_eq!(plan.nodes[1].priority, Priority::High);
        assert_eq!(plan.nodes[0].priority, Priority::Medium);
    }

    #[test]
    fn test_unparsable_output_falls_back() {
        let raw = "I think you should talk to a lawyer.";
        let plan = builder(raw).parse_plan(raw, "my client won't pay");
        assert_fallback(&plan, "my client won't pay");
    }

    #[test]
    fn test_empty_plan_falls_back() {
        let raw = r#"{"outcome": "plan", "nodes": []}"#;
        let plan = builder(raw).parse_plan(raw, "req");
        assert_fallback(&plan, "req");
    }

    #[test]
    fn test_duplicate_ids_fall_back() {
        let raw = r#"{"nodes": [
            {"id": "a", "actor": "x", "instruction": "one"},
            {"id": "a", "actor": "y", "instruction": "two"}
        ]}"#;
        let plan = builder(raw).parse_plan(raw, "req");
        assert_fallback(&plan, "req");
    }

    #[test]
    fn test_dangling_dependency_falls_back() {
        let raw = r#"{"nodes": [
            {"id": "a", "actor": "x", "instruction": "one", "dependencies": ["ghost"]}
        ]}"#;
        let plan = builder(raw).parse_plan(raw, "req");
        assert_fallback(&plan, "req");
    }

    #[test]
    fn test_unknown_actor_falls_back() {
        let raw = r#"{"nodes": [{"id": "a", "actor": "astrologer", "instruction": "predict"}]}"#;
        let plan = builder(raw)
            .with_known_actors(vec!["contract".into(), "general".into()])
            .parse_plan(raw, "req");
        assert_fallback(&plan, "req");
    }

    #[test]
    fn test_direct_response() {
        let raw = r#"{"outcome": "direct_response", "direct_response_content": "Hi! How can I help?"}"#;
        let plan = builder(raw).parse_plan(raw, "hello");
        assert!(plan.is_direct_response());
        assert!(plan.nodes.is_empty());
        assert_eq!(plan.direct_response_content.as_deref(), Some("Hi! How can I help?"));
    }

    #[test]
    fn test_direct_response_without_content_falls_back() {
        let raw = r#"{"outcome": "direct_response"}"#;
        let plan = builder(raw).parse_plan(raw, "hello");
        assert_fallback(&plan, "hello");
    }

    #[tokio::test]
    async fn test_build_uses_generator() {
        let generator = Arc::new(StaticGenerator::new("not json at all"));
        let builder = PlanBuilder::new(generator.clone(), PlannerConfig::default());
        let plan = builder.build("review my NDA", &ActorContext::new()).await.unwrap();
        assert_fallback(&plan, "review my NDA");
        assert_eq!(generator.requests(), vec!["review my NDA"]);
    }

    #[tokio::test]
    async fn test_generator_error_propagates() {
        let builder = PlanBuilder::new(
            Arc::new(StaticGenerator::failing("upstream unavailable")),
            PlannerConfig::default(),
        );
        let result = builder.build("anything", &ActorContext::new()).await;
        assert!(matches!(result, Err(CovenantError::Planner(_))));
    }
}
