use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, warn};

use covenant_core::error::{CovenantError, Result};
use covenant_core::traits::ActorExecutor;
use covenant_core::types::{ActorContext, ActorOutput, TaskNode};

/// Outcome of running one node, attributed to its id.
#[derive(Debug)]
pub struct TaskReport {
    pub task_id: String,
    pub outcome: Result<ActorOutput>,
    pub elapsed_ms: u64,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Run a single node against the actor executor.
///
/// Actor errors, timeouts, and panics all come back as the `Err` branch of
/// `TaskReport::outcome`, so one failing node never disturbs its siblings in
/// the same wave.
pub async fn run_task(
    executor: &dyn ActorExecutor,
    node: &TaskNode,
    actor_id: &str,
    context: &ActorContext,
    timeout: Option<Duration>,
) -> TaskReport {
    let start = Instant::now();
    // Guards the synchronous call as well as the future it returns.
    let call =
        AssertUnwindSafe(async move { executor.execute(node, actor_id, context).await }).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => flatten_panic(&node.id, result),
            Err(_) => Err(CovenantError::TaskTimeout {
                task_id: node.id.clone(),
                timeout_ms: limit.as_millis() as u64,
            }),
        },
        None => flatten_panic(&node.id, call.await),
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match &outcome {
        Ok(_) => debug!(task_id = %node.id, actor = %node.actor, elapsed_ms, "Task finished"),
        Err(e) => warn!(task_id = %node.id, actor = %node.actor, error = %e, elapsed_ms, "Task failed"),
    }

    TaskReport {
        task_id: node.id.clone(),
        outcome,
        elapsed_ms,
    }
}

fn flatten_panic(
    task_id: &str,
    result: std::result::Result<Result<ActorOutput>, Box<dyn Any + Send>>,
) -> Result<ActorOutput> {
    match result {
        Ok(inner) => inner,
        Err(payload) => Err(CovenantError::TaskPanicked {
            task_id: task_id.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
