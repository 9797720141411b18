use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use covenant_core::config::ExecutorConfig;
use covenant_core::error::{CovenantError, Result};
use covenant_core::event::{EventEmitter, WorkflowEvent};
use covenant_core::traits::ActorExecutor;
use covenant_core::types::{
    ActorContext, TaskNode, TaskStatus, WorkflowPlan, WorkflowStatus, UPSTREAM_RESULTS_KEY,
};

use crate::runner::{run_task, TaskReport};

/// Why the scheduling loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// No pending or running nodes left.
    Completed,
    /// Pending nodes could never become ready and were failed.
    Deadlock,
    /// The iteration bound tripped. Indicates a scheduling bug.
    IterationLimit,
}

/// Summary of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub status: WorkflowStatus,
    pub completion: f64,
    /// Number of batches dispatched.
    pub waves: usize,
    /// Loop iterations, including the one that detected deadlock.
    pub iterations: usize,
    pub exit: ExitReason,
    pub elapsed_ms: u64,
}

/// A workflow running on a background task.
pub struct WorkflowRun {
    /// Events in emission order. Ends when the workflow finishes.
    pub events: UnboundedReceiverStream<WorkflowEvent>,
    /// Resolves to the final plan and its report.
    pub handle: JoinHandle<Result<(WorkflowPlan, ExecutionReport)>>,
}

/// Why a pending node can never run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Starvation {
    /// Depends on an id that is not in the plan.
    MissingDependency(String),
    /// Depends on a node that failed.
    UpstreamFailed(String),
    /// Depends on a node that is itself starved for one of the reasons above.
    UpstreamBlocked(String),
    Circular,
}

/// Executes a plan's task graph in waves.
///
/// Each iteration computes the ready set (pending nodes whose dependencies
/// are all completed), dispatches up to `max_parallel` of them concurrently,
/// and waits for the whole wave before looking at the graph again. Ready
/// sets are therefore never computed while a node is running.
pub struct WorkflowExecutor {
    executor: Arc<dyn ActorExecutor>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create an executor. A `max_parallel` of 0 is treated as 1.
    pub fn new(executor: Arc<dyn ActorExecutor>, mut config: ExecutorConfig) -> Self {
        if config.max_parallel == 0 {
            warn!("max_parallel of 0 requested, using 1");
            config.max_parallel = 1;
        }
        Self { executor, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `plan` to a terminal state, mutating its nodes in place.
    ///
    /// Individual task failures are recorded on the nodes and surfaced as
    /// `agent_error` events; they never make this return `Err`. The only
    /// error is being handed a direct-response plan.
    pub async fn execute(
        &self,
        plan: &mut WorkflowPlan,
        actor_id: &str,
        extra_context: &ActorContext,
        events: &EventEmitter,
    ) -> Result<ExecutionReport> {
        if plan.is_direct_response() {
            return Err(CovenantError::DirectResponse(plan.id.clone()));
        }

        let start = Instant::now();
        let total = plan.nodes.len();
        let max_iterations = total * 2;
        let mut iterations = 0usize;
        let mut waves = 0usize;
        let mut exit = ExitReason::Completed;

        info!(workflow_id = %plan.id, total_tasks = total, max_parallel = self.config.max_parallel, "Workflow started");
        plan.status = WorkflowStatus::Running;

        events.emit(WorkflowEvent::WorkflowStart {
            workflow_id: plan.id.clone(),
            objective: plan.objective.clone(),
            total_tasks: total,
        });
        events.emit(WorkflowEvent::update(plan.snapshot()));

        while !plan.is_finished() {
            if iterations >= max_iterations {
                error!(
                    workflow_id = %plan.id,
                    iterations,
                    pending = plan.count_with_status(TaskStatus::Pending),
                    "Iteration limit exceeded, scheduler invariant violated"
                );
                let message = CovenantError::IterationLimit(iterations).to_string();
                for node in plan.nodes.iter_mut().filter(|n| !n.status.is_terminal()) {
                    node.fail(message.clone());
                }
                events.emit(WorkflowEvent::update(plan.snapshot()));
                exit = ExitReason::IterationLimit;
                break;
            }
            iterations += 1;

            let ready = self.ready_set(plan);

            if ready.is_empty() {
                let pending = plan.count_with_status(TaskStatus::Pending);
                let running = plan.count_with_status(TaskStatus::Running);

                if pending > 0 && running == 0 {
                    resolve_deadlock(plan);
                    events.emit(WorkflowEvent::update(plan.snapshot()));
                    exit = ExitReason::Deadlock;
                    break;
                } else if running > 0 {
                    debug!(running, "Waiting on running tasks");
                    tokio::time::sleep(self.config.poll_interval()).await;
                    continue;
                } else {
                    break;
                }
            }

            let batch: Vec<usize> = ready.into_iter().take(self.config.max_parallel).collect();
            waves += 1;
            debug!(wave = waves, size = batch.len(), "Dispatching wave");

            let mut dispatched: Vec<(TaskNode, ActorContext)> = Vec::with_capacity(batch.len());
            for &idx in &batch {
                let context = node_context(plan, idx, extra_context);
                let node = &mut plan.nodes[idx];
                node.mark_running();
                events.emit(WorkflowEvent::AgentStart {
                    task_id: node.id.clone(),
                    agent: node.actor.clone(),
                    instruction: node.instruction.clone(),
                });
                dispatched.push((node.clone(), context));
            }
            events.emit(WorkflowEvent::update(plan.snapshot()));

            let timeout = self.config.task_timeout();
            let reports: Vec<TaskReport> = futures::future::join_all(
                dispatched
                    .iter()
                    .map(|(node, ctx)| run_task(self.executor.as_ref(), node, actor_id, ctx, timeout)),
            )
            .await;

            for (idx, report) in batch.into_iter().zip(reports) {
                self.record(&mut plan.nodes[idx], report, events);
            }
            events.emit(WorkflowEvent::update(plan.snapshot()));
        }

        let status = if plan.nodes.iter().all(|n| n.status == TaskStatus::Completed) {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        plan.status = status;
        let completion = plan.completion_percentage();

        events.emit(WorkflowEvent::WorkflowComplete {
            workflow_id: plan.id.clone(),
            status,
            completion,
            results: plan.results(),
        });

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            workflow_id = %plan.id,
            %status,
            completion,
            waves,
            iterations,
            exit = ?exit,
            elapsed_ms,
            "Workflow finished"
        );

        Ok(ExecutionReport {
            status,
            completion,
            waves,
            iterations,
            exit,
            elapsed_ms,
        })
    }

    /// Run `plan` on a background task and stream its events.
    pub fn spawn(
        self: &Arc<Self>,
        mut plan: WorkflowPlan,
        actor_id: impl Into<String>,
        extra_context: ActorContext,
    ) -> Result<WorkflowRun> {
        if plan.is_direct_response() {
            return Err(CovenantError::DirectResponse(plan.id.clone()));
        }

        let (emitter, rx) = EventEmitter::channel();
        let this = Arc::clone(self);
        let actor_id = actor_id.into();

        let handle = tokio::spawn(async move {
            let report = this
                .execute(&mut plan, &actor_id, &extra_context, &emitter)
                .await?;
            Ok((plan, report))
        });

        Ok(WorkflowRun {
            events: UnboundedReceiverStream::new(rx),
            handle,
        })
    }

    /// Indices of pending nodes whose dependencies have all completed, in
    /// plan order (or priority order when configured).
    fn ready_set(&self, plan: &WorkflowPlan) -> Vec<usize> {
        let status: HashMap<&str, TaskStatus> =
            plan.nodes.iter().map(|n| (n.id.as_str(), n.status)).collect();

        let mut ready: Vec<usize> = plan
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status == TaskStatus::Pending)
            .filter(|(_, n)| {
                n.dependencies
                    .iter()
                    .all(|dep| status.get(dep.as_str()) == Some(&TaskStatus::Completed))
            })
            .map(|(i, _)| i)
            .collect();

        if self.config.order_by_priority {
            // Stable: equal priorities keep plan order.
            ready.sort_by(|a, b| plan.nodes[*b].priority.cmp(&plan.nodes[*a].priority));
        }
        ready
    }

    fn record(&self, node: &mut TaskNode, report: TaskReport, events: &EventEmitter) {
        match report.outcome {
            Ok(output) => {
                let preview = truncate_chars(&output.output, self.config.output_preview_chars);
                node.complete(output.output.clone());
                events.emit(WorkflowEvent::AgentFinish {
                    task_id: node.id.clone(),
                    agent: node.actor.clone(),
                    output: preview,
                });
                if let Some(component) = output.ui_component {
                    events.emit(WorkflowEvent::UiComponent {
                        task_id: node.id.clone(),
                        component,
                    });
                }
                if let Some(message) = output.message {
                    events.emit(WorkflowEvent::Message {
                        task_id: node.id.clone(),
                        message,
                    });
                }
            }
            Err(e) => {
                let message = e.to_string();
                node.fail(message.clone());
                events.emit(WorkflowEvent::AgentError {
                    task_id: node.id.clone(),
                    agent: node.actor.clone(),
                    error: message,
                });
            }
        }
    }
}

/// Caller context plus the results of the node's dependencies.
fn node_context(plan: &WorkflowPlan, idx: usize, extra: &ActorContext) -> ActorContext {
    let mut context = extra.clone();
    let upstream: serde_json::Map<String, serde_json::Value> = plan.nodes[idx]
        .dependencies
        .iter()
        .filter_map(|dep| {
            plan.node(dep)
                .and_then(|n| n.result.as_ref())
                .map(|r| (dep.clone(), serde_json::Value::String(r.clone())))
        })
        .collect();
    if !upstream.is_empty() {
        context.set(UPSTREAM_RESULTS_KEY, serde_json::Value::Object(upstream));
    }
    context
}

/// Fail every pending node, logging why each one starved.
fn resolve_deadlock(plan: &mut WorkflowPlan) {
    let causes = classify_starved(plan);

    for node in plan.nodes.iter_mut().filter(|n| n.status == TaskStatus::Pending) {
        let detail = match causes.get(&node.id).unwrap_or(&Starvation::Circular) {
            Starvation::MissingDependency(dep) => {
                warn!(task_id = %node.id, dependency = %dep, "Deadlock: dependency does not exist in plan");
                format!("dependency '{}' does not exist in the plan", dep)
            }
            Starvation::UpstreamFailed(dep) => {
                warn!(task_id = %node.id, dependency = %dep, "Deadlock: dependency failed");
                format!("dependency '{}' failed", dep)
            }
            Starvation::UpstreamBlocked(dep) => {
                warn!(task_id = %node.id, dependency = %dep, "Deadlock: dependency can never run");
                format!("dependency '{}' can never run", dep)
            }
            Starvation::Circular => {
                warn!(task_id = %node.id, dependencies = ?node.dependencies, "Deadlock: circular dependency");
                "circular dependency".to_string()
            }
        };
        node.fail(CovenantError::Deadlock(detail).to_string());
    }
}

/// Work out why each pending node is starved.
///
/// Direct causes (dangling id, failed dependency) are assigned first, then
/// propagated to pending dependents until nothing changes. Whatever is left
/// only waits on itself through a cycle.
fn classify_starved(plan: &WorkflowPlan) -> HashMap<String, Starvation> {
    let known: HashSet<&str> = plan.nodes.iter().map(|n| n.id.as_str()).collect();
    let pending: Vec<&TaskNode> = plan
        .nodes
        .iter()
        .filter(|n| n.status == TaskStatus::Pending)
        .collect();

    let mut causes: HashMap<String, Starvation> = HashMap::new();
    for node in &pending {
        if let Some(dep) = node.dependencies.iter().find(|d| !known.contains(d.as_str())) {
            causes.insert(node.id.clone(), Starvation::MissingDependency(dep.clone()));
        } else if let Some(dep) = node
            .dependencies
            .iter()
            .find(|d| plan.node(d).is_some_and(|n| n.status == TaskStatus::Failed))
        {
            causes.insert(node.id.clone(), Starvation::UpstreamFailed(dep.clone()));
        }
    }

    loop {
        let mut changed = false;
        for node in &pending {
            if causes.contains_key(&node.id) {
                continue;
            }
            if let Some(dep) = node.dependencies.iter().find(|d| causes.contains_key(*d)) {
                causes.insert(node.id.clone(), Starvation::UpstreamBlocked(dep.clone()));
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for node in &pending {
        causes.entry(node.id.clone()).or_insert(Starvation::Circular);
    }
    causes
}

/// Truncate to at most `max` chars, on a char boundary.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_test_utils::{chain_plan, node, Script, ScriptedExecutor};

    fn executor(exec: ScriptedExecutor, max_parallel: usize) -> WorkflowExecutor {
        WorkflowExecutor::new(Arc::new(exec), ExecutorConfig::with_max_parallel(max_parallel))
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }

    #[test]
    fn test_ready_set_respects_dependencies() {
        let exec = executor(ScriptedExecutor::new(), 4);
        let mut plan = chain_plan();
        assert_eq!(exec.ready_set(&plan), vec![0]);

        plan.nodes[0].complete("ok");
        assert_eq!(exec.ready_set(&plan), vec![1]);

        plan.nodes[1].mark_running();
        assert!(exec.ready_set(&plan).is_empty());
    }

    #[test]
    fn test_ready_set_priority_ordering() {
        let mut config = ExecutorConfig::with_max_parallel(4);
        config.order_by_priority = true;
        let exec = WorkflowExecutor::new(Arc::new(ScriptedExecutor::new()), config);

        let plan = WorkflowPlan::new(
            "priorities",
            vec![
                node("low", &[]).with_priority(covenant_core::Priority::Low),
                node("mid", &[]),
                node("high", &[]).with_priority(covenant_core::Priority::High),
                node("mid2", &[]),
            ],
        );
        assert_eq!(exec.ready_set(&plan), vec![2, 1, 3, 0]);
    }

    #[test]
    fn test_zero_parallelism_clamped() {
        let exec = executor(ScriptedExecutor::new(), 0);
        assert_eq!(exec.config().max_parallel, 1);
    }

    #[test]
    fn test_classify_starvation() {
        let mut plan = WorkflowPlan::new(
            "starved",
            vec![
                node("a", &[]),
                node("b", &["a"]),
                node("ghosted", &["ghost"]),
                node("behind", &["ghosted"]),
                node("x", &["y"]),
                node("y", &["x"]),
            ],
        );
        plan.nodes[0].fail("boom");

        let causes = classify_starved(&plan);
        assert_eq!(causes["b"], Starvation::UpstreamFailed("a".into()));
        assert_eq!(causes["ghosted"], Starvation::MissingDependency("ghost".into()));
        assert_eq!(causes["behind"], Starvation::UpstreamBlocked("ghosted".into()));
        assert_eq!(causes["x"], Starvation::Circular);
        assert_eq!(causes["y"], Starvation::Circular);
        assert!(!causes.contains_key("a"));
    }

    #[tokio::test]
    async fn test_direct_response_rejected() {
        let exec = executor(ScriptedExecutor::new(), 4);
        let mut plan = WorkflowPlan::direct_response("hi", "hello");
        let (emitter, mut rx) = EventEmitter::channel();
        let result = exec
            .execute(&mut plan, "session", &ActorContext::new(), &emitter)
            .await;
        assert!(matches!(result, Err(CovenantError::DirectResponse(_))));
        drop(emitter);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_upstream_results_in_context() {
        let scripted = Arc::new(ScriptedExecutor::new().with_script("a", Script::ok("clauses: 4")));
        let exec = WorkflowExecutor::new(scripted.clone(), ExecutorConfig::default());
        let mut plan = chain_plan();

        let mut extra = ActorContext::new();
        extra.set_str("client", "Acme");

        exec.execute(&mut plan, "session", &extra, &EventEmitter::disabled())
            .await
            .unwrap();

        let ctx_a = scripted.context_for("a").unwrap();
        assert!(ctx_a.upstream_results().is_none());
        assert_eq!(ctx_a.get_str("client"), Some("Acme"));

        let ctx_b = scripted.context_for("b").unwrap();
        let upstream = ctx_b.upstream_results().unwrap();
        assert_eq!(upstream.get("a"), Some(&serde_json::json!("clauses: 4")));
        assert_eq!(ctx_b.get_str("client"), Some("Acme"));
    }

    #[tokio::test]
    async fn test_preview_truncated_but_result_kept() {
        let long = "x".repeat(40);
        let scripted = ScriptedExecutor::new().with_script("a", Script::ok(long.clone()));
        let mut config = ExecutorConfig::with_max_parallel(1);
        config.output_preview_chars = 10;
        let exec = WorkflowExecutor::new(Arc::new(scripted), config);

        let mut plan = WorkflowPlan::new("long", vec![node("a", &[])]);
        let (emitter, mut rx) = EventEmitter::channel();
        exec.execute(&mut plan, "session", &ActorContext::new(), &emitter)
            .await
            .unwrap();
        drop(emitter);

        let mut preview = None;
        while let Some(event) = rx.recv().await {
            if let WorkflowEvent::AgentFinish { output, .. } = event {
                preview = Some(output);
            }
        }
        assert_eq!(preview.unwrap(), format!("{}...", "x".repeat(10)));
        assert_eq!(plan.nodes[0].result.as_deref(), Some(long.as_str()));
    }

    #[tokio::test]
    async fn test_self_dependency_deadlocks() {
        let exec = executor(ScriptedExecutor::new(), 2);
        let mut plan = WorkflowPlan::new("loop", vec![node("a", &["a"])]);
        let report = exec
            .execute(&mut plan, "session", &ActorContext::new(), &EventEmitter::disabled())
            .await
            .unwrap();
        assert_eq!(report.exit, ExitReason::Deadlock);
        let err = plan.nodes[0].error.as_deref().unwrap();
        assert!(err.starts_with("deadlock:"));
        assert!(err.contains("circular"));
    }
}
