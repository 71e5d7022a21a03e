// Public modules
pub mod actions;
pub mod error;
pub mod executor;
pub mod job;
pub mod matrix;
pub mod pipeline;
pub mod tasks;
pub mod trigger;
pub mod workflow;
pub mod workspace;

// Internal modules - not part of public API
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use pipeline::{RunFilters, RunOptions, RunPlan, RunResult, RunStatus};
pub use trigger::TriggerEvent;
pub use workflow::Workflow;
