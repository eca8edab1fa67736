// ABOUTME: Error types for workflow file parsing and conversion
// ABOUTME: Covers IO, YAML, and structural problems in workflow definitions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("step {index} has an empty name")]
    UnnamedStep { index: usize },

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("step {step}: assertion entry does not name an assertion")]
    EmptyAssertion { step: String },
}

pub type Result<T> = std::result::Result<T, ParserError>;
