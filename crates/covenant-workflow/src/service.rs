use std::sync::Arc;

use tracing::info;

use covenant_core::error::{CovenantError, Result};
use covenant_core::types::ActorContext;

use crate::executor::{WorkflowExecutor, WorkflowRun};
use crate::planner::PlanBuilder;

/// What became of a request.
pub enum Handled {
    /// Answered without scheduling anything.
    Direct(String),
    /// A plan is executing; consume its events and join its handle.
    Running(WorkflowRun),
}

/// Plans a request and, unless it can be answered directly, executes it.
pub struct WorkflowService {
    builder: PlanBuilder,
    executor: Arc<WorkflowExecutor>,
}

impl WorkflowService {
    pub fn new(builder: PlanBuilder, executor: Arc<WorkflowExecutor>) -> Self {
        Self { builder, executor }
    }

    pub async fn handle(
        &self,
        request: &str,
        actor_id: &str,
        context: ActorContext,
    ) -> Result<Handled> {
        let plan = self.builder.build(request, &context).await?;

        if plan.is_direct_response() {
            info!(workflow_id = %plan.id, "Direct response, skipping execution");
            let content = plan
                .direct_response_content
                .ok_or_else(|| CovenantError::Planner("direct response without content".into()))?;
            return Ok(Handled::Direct(content));
        }

        let run = self.executor.spawn(plan, actor_id, context)?;
        Ok(Handled::Running(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::config::{ExecutorConfig, PlannerConfig};
    use covenant_core::types::WorkflowStatus;
    use covenant_test_utils::{ScriptedExecutor, StaticGenerator};
    use tokio_stream::StreamExt;

    fn service(raw: &str, scripted: Arc<ScriptedExecutor>) -> WorkflowService {
        let builder = PlanBuilder::new(Arc::new(StaticGenerator::new(raw)), PlannerConfig::default());
        let executor = Arc::new(WorkflowExecutor::new(scripted, ExecutorConfig::default()));
        WorkflowService::new(builder, executor)
    }

    #[tokio::test]
    async fn test_direct_response_never_executes() {
        let scripted = Arc::new(ScriptedExecutor::new());
        let svc = service(
            r#"{"outcome": "direct_response", "direct_response_content": "Invoices are due in 30 days."}"#,
            scripted.clone(),
        );

        match svc.handle("when are invoices due?", "sess", ActorContext::new()).await.unwrap() {
            Handled::Direct(content) => assert_eq!(content, "Invoices are due in 30 days."),
            Handled::Running(_) => panic!("direct response must not execute"),
        }
        assert!(scripted.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plan_is_executed() {
        let scripted = Arc::new(ScriptedExecutor::new());
        let svc = service(
            r#"{"nodes": [
                {"id": "a", "actor": "contract", "instruction": "read"},
                {"id": "b", "actor": "writer", "instruction": "write", "dependencies": ["a"]}
            ]}"#,
            scripted.clone(),
        );

        let Handled::Running(mut run) = svc.handle("help", "sess", ActorContext::new()).await.unwrap()
        else {
            panic!("expected a running workflow");
        };

        let mut kinds = Vec::new();
        while let Some(event) = run.events.next().await {
            kinds.push(event.kind());
        }
        let (plan, report) = run.handle.await.unwrap().unwrap();

        assert_eq!(kinds.first(), Some(&"workflow_start"));
        assert_eq!(kinds.last(), Some(&"workflow_complete"));
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(plan.status, WorkflowStatus::Completed);
        assert_eq!(scripted.calls(), vec!["a", "b"]);
    }
}
