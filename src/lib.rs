// ABOUTME: Main library module for the caravan workflow engine
// ABOUTME: Exports all core modules and provides the public API

pub mod assertions;
pub mod backend;
pub mod cli;
pub mod engine;
pub mod parser;

// Re-export commonly used types
pub use assertions::{
    exit_code, output_contains, output_equals, output_json_equals, output_matches, AssertionError,
    AssertionFn,
};
pub use backend::{get_backend, register_backend, Backend, BackendStatus};
pub use engine::{Dag, EngineError, Task, TaskOutput, Workflow, WorkflowError};
pub use parser::{load_workflow, ParserError, StepSpec, WorkflowSpec};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
