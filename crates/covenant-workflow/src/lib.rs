//! Workflow execution for Covenant.
//!
//! A request is turned into a `WorkflowPlan` by the `PlanBuilder`, then the
//! `WorkflowExecutor` runs the plan's task graph in waves: every pending node
//! whose dependencies have completed is dispatched (up to `max_parallel` at a
//! time), the whole wave is awaited, node state is updated, and the next ready
//! set is computed. Progress is streamed as `WorkflowEvent`s.

pub mod executor;
pub mod planner;
pub mod registry;
pub mod run_log;
pub mod runner;
pub mod service;

pub use executor::{ExecutionReport, ExitReason, WorkflowExecutor, WorkflowRun};
pub use planner::PlanBuilder;
pub use registry::ActorRegistry;
pub use run_log::RunLogger;
pub use runner::{run_task, TaskReport};
pub use service::{Handled, WorkflowService};
