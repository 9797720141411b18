//! Fakes and fixtures shared by Covenant's test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use covenant_core::error::{CovenantError, Result};
use covenant_core::traits::{ActorExecutor, PlanGenerator};
use covenant_core::types::{ActorContext, ActorOutput, TaskNode, WorkflowPlan};

/// What the scripted executor does for a given node.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(ActorOutput),
    Fail(String),
    Panic(String),
    Delayed { delay: Duration, output: ActorOutput },
}

impl Script {
    pub fn ok(output: impl Into<String>) -> Self {
        Self::Succeed(ActorOutput::text(output))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    pub fn delayed(delay: Duration, output: impl Into<String>) -> Self {
        Self::Delayed {
            delay,
            output: ActorOutput::text(output),
        }
    }
}

/// An `ActorExecutor` driven by per-node scripts.
///
/// Unscripted nodes succeed with `"done: {instruction}"` after the default
/// delay. Every call is recorded, along with the context it received and the
/// peak number of calls in flight at once.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    default_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    contexts: Mutex<HashMap<String, ActorContext>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, node_id: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(node_id.into(), script);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Node ids in the order they were dispatched.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Context a node was executed with.
    pub fn context_for(&self, node_id: &str) -> Option<ActorContext> {
        self.contexts.lock().unwrap().get(node_id).cloned()
    }

    /// Most calls observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, node: &TaskNode, context: &ActorContext) {
        self.calls.lock().unwrap().push(node.id.clone());
        self.contexts
            .lock()
            .unwrap()
            .insert(node.id.clone(), context.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ActorExecutor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        node: &'a TaskNode,
        _actor_id: &'a str,
        context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<ActorOutput>> {
        Box::pin(async move {
            self.enter(node, context);
            let script = self.scripts.get(&node.id).cloned();

            let (delay, result) = match script {
                None => (
                    self.default_delay,
                    Ok(ActorOutput::text(format!("done: {}", node.instruction))),
                ),
                Some(Script::Succeed(output)) => (self.default_delay, Ok(output)),
                Some(Script::Fail(message)) => (
                    self.default_delay,
                    Err(CovenantError::ActorExecution {
                        actor: node.actor.clone(),
                        message,
                    }),
                ),
                Some(Script::Delayed { delay, output }) => (Some(delay), Ok(output)),
                Some(Script::Panic(message)) => {
                    self.leave();
                    panic!("{}", message);
                }
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.leave();
            result
        })
    }
}

/// A `PlanGenerator` that always returns the same text (or error).
pub struct StaticGenerator {
    response: std::result::Result<String, String>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StaticGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: Ok(response.into()),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(message.into()),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl PlanGenerator for StaticGenerator {
    fn generate<'a>(
        &'a self,
        request: &'a str,
        _context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.to_string());
            self.response.clone().map_err(CovenantError::Planner)
        })
    }
}

/// Pending node on the `echo` actor.
pub fn node(id: &str, deps: &[&str]) -> TaskNode {
    TaskNode::new(id, "echo", format!("task {}", id)).with_dependencies(deps.iter().copied())
}

/// Plan of `count` nodes with no dependencies (`t1`, `t2`, ...).
pub fn independent_plan(count: usize) -> WorkflowPlan {
    let nodes = (1..=count).map(|i| node(&format!("t{}", i), &[])).collect();
    WorkflowPlan::new(format!("{} independent tasks", count), nodes)
}

/// `a -> b -> c`.
pub fn chain_plan() -> WorkflowPlan {
    WorkflowPlan::new(
        "chain",
        vec![node("a", &[]), node("b", &["a"]), node("c", &["b"])],
    )
}

/// `a` fans out to `b` and `c`, which join at `d`.
pub fn diamond_plan() -> WorkflowPlan {
    WorkflowPlan::new(
        "diamond",
        vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ],
    )
}
