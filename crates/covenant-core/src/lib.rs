pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{CovenantError, Result};
pub use event::{EventEmitter, WorkflowEvent};
pub use types::*;
