use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ActorContext, ActorOutput, TaskNode};

/// Runs one task node. The executor's only view of "work".
pub trait ActorExecutor: Send + Sync + 'static {
    /// Execute `node` on behalf of the session/actor `actor_id`.
    fn execute<'a>(
        &'a self,
        node: &'a TaskNode,
        actor_id: &'a str,
        context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<ActorOutput>>;
}

/// Actor: one specialist capability, addressed by id.
pub trait Actor: Send + Sync + 'static {
    /// Actor id (matches `TaskNode::actor`).
    fn id(&self) -> &str;

    /// Human-readable description, used when listing capabilities.
    fn description(&self) -> &str;

    /// Carry out an instruction.
    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<ActorOutput>>;
}

/// Plan generator: the step that turns a request into raw plan text.
pub trait PlanGenerator: Send + Sync + 'static {
    fn generate<'a>(
        &'a self,
        request: &'a str,
        context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<String>>;
}
