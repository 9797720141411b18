//! Built-in demo actors for running plan files from the command line.

use futures::future::BoxFuture;

use covenant_core::error::Result;
use covenant_core::traits::Actor;
use covenant_core::types::{ActorContext, ActorOutput};
use covenant_workflow::ActorRegistry;

/// Returns the instruction unchanged.
pub struct EchoActor;

impl Actor for EchoActor {
    fn id(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its instruction back"
    }

    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        _context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<ActorOutput>> {
        Box::pin(async move { Ok(ActorOutput::text(instruction)) })
    }
}

/// Concatenates upstream results under the instruction.
pub struct CollectActor;

impl Actor for CollectActor {
    fn id(&self) -> &str {
        "collect"
    }

    fn description(&self) -> &str {
        "Combines the results of its dependencies"
    }

    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<ActorOutput>> {
        Box::pin(async move {
            let mut out = String::from(instruction);
            if let Some(upstream) = context.upstream_results() {
                for (id, value) in upstream {
                    let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                    out.push_str(&format!("\n- {}: {}", id, text));
                }
            }
            Ok(ActorOutput::text(out).with_message(serde_json::json!({
                "text": format!("Collected {} result(s)", context.upstream_results().map_or(0, |u| u.len())),
            })))
        })
    }
}

/// Catch-all actor that fallback plans are routed to.
pub struct GeneralActor;

impl Actor for GeneralActor {
    fn id(&self) -> &str {
        "general"
    }

    fn description(&self) -> &str {
        "Handles requests no specialist was planned for"
    }

    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        _context: &'a ActorContext,
    ) -> BoxFuture<'a, Result<ActorOutput>> {
        Box::pin(async move { Ok(ActorOutput::text(format!("Handled: {}", instruction.trim()))) })
    }
}

pub fn demo_registry() -> ActorRegistry {
    let mut registry = ActorRegistry::new();
    registry.register(EchoActor);
    registry.register(CollectActor);
    registry.register(GeneralActor);
    registry
}
