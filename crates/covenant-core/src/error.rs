use thiserror::Error;

#[derive(Debug, Error)]
pub enum CovenantError {
    // Actor errors
    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    #[error("Actor execution failed: {actor}: {message}")]
    ActorExecution { actor: String, message: String },

    // Task errors
    #[error("Task timeout after {timeout_ms}ms: {task_id}")]
    TaskTimeout { task_id: String, timeout_ms: u64 },

    #[error("Task panicked: {task_id}: {message}")]
    TaskPanicked { task_id: String, message: String },

    // Scheduling errors
    #[error("deadlock: {0}")]
    Deadlock(String),

    #[error("iteration limit exceeded after {0} iterations")]
    IterationLimit(usize),

    // Planner errors
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Planner failed: {0}")]
    Planner(String),

    #[error("Plan {0} is a direct response and cannot be executed")]
    DirectResponse(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CovenantError>;
