// ABOUTME: Parser module for YAML workflow definitions
// ABOUTME: Exports workflow parsing, conversion, and error types

pub mod error;
pub mod workflow;

pub use error::ParserError;
pub use workflow::{load_workflow, AssertSpec, StepSpec, WorkflowSpec};
