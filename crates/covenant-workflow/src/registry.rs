use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use covenant_core::error::{CovenantError, Result};
use covenant_core::traits::{Actor, ActorExecutor};
use covenant_core::types::{ActorContext, ActorOutput, TaskNode};

/// Registry of available actors.
///
/// Built once at startup and shared by reference; it is the default
/// `ActorExecutor`, resolving each node's `actor` id to a capability.
#[derive(Default)]
pub struct ActorRegistry {
    actors: HashMap<String, Arc<dyn Actor>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor, replacing any previous one with the same id.
    pub fn register(&mut self, actor: impl Actor) {
        let id = actor.id().to_string();
        self.actors.insert(id, Arc::new(actor));
    }

    /// Unregister an actor by id.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.actors.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Actor>> {
        self.actors.get(id).cloned()
    }

    /// Registered actor ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.actors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `(id, description)` pairs, sorted by id.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .actors
            .values()
            .map(|a| (a.id().to_string(), a.description().to_string()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl ActorExecutor for ActorRegistry {
    fn execute<'a>(
        &'a self,
        node: &'a TaskNode,
        actor_id: &'a str,
        context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<ActorOutput>> {
        Box::pin(async move {
            let actor = self
                .get(&node.actor)
                .ok_or_else(|| CovenantError::ActorNotFound(node.actor.clone()))?;

            debug!(task_id = %node.id, actor = %node.actor, session = %actor_id, "Dispatching to actor");

            let mut ctx = context.clone();
            ctx.set_str("session_id", actor_id);
            actor.execute(&node.instruction, &ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Actor for Upper {
        fn id(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercases the instruction"
        }

        fn execute<'a>(
            &'a self,
            instruction: &'a str,
            context: &'a ActorContext,
        ) -> BoxFuture<'a, Result<ActorOutput>> {
            Box::pin(async move {
                let session = context.get_str("session_id").unwrap_or("none");
                Ok(ActorOutput::text(format!("{} [{}]", instruction.to_uppercase(), session)))
            })
        }
    }

    #[test]
    fn test_register_and_describe() {
        let mut registry = ActorRegistry::new();
        assert!(registry.is_empty());
        registry.register(Upper);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec!["upper"]);
        assert_eq!(
            registry.describe(),
            vec![("upper".to_string(), "Uppercases the instruction".to_string())]
        );
        assert!(registry.unregister("upper"));
        assert!(!registry.unregister("upper"));
    }

    #[tokio::test]
    async fn test_dispatch_by_actor_id() {
        let mut registry = ActorRegistry::new();
        registry.register(Upper);

        let node = TaskNode::new("n1", "upper", "check the invoice");
        let output = registry
            .execute(&node, "sess-1", &ActorContext::new())
            .await
            .unwrap();
        assert_eq!(output.output, "CHECK THE INVOICE [sess-1]");
    }

    #[tokio::test]
    async fn test_unknown_actor_is_error() {
        let registry = ActorRegistry::new();
        let node = TaskNode::new("n1", "lawyer", "review");
        let result = registry.execute(&node, "sess-1", &ActorContext::new()).await;
        assert!(matches!(result, Err(CovenantError::ActorNotFound(ref a)) if a == "lawyer"));
    }
}
