// ABOUTME: Error types for workflow execution engine operations
// ABOUTME: Defines engine error kinds and the step-scoped workflow error wrapper

use std::time::Duration;
use thiserror::Error;

use crate::assertions::AssertionError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("task {task} has no command")]
    EmptyCommand { task: String },

    #[error("task must have a name")]
    UnnamedTask,

    #[error("task with name {0} already exists")]
    DuplicateTask(String),

    #[error("dependency {dep} for task {task} does not exist")]
    MissingDependency { task: String, dep: String },

    #[error("cycle detected involving task {0}")]
    CycleDetected(String),

    #[error("backend {name} not found")]
    BackendNotFound { name: String },

    #[error("task {task} is not valid for backend {backend}: {reason}")]
    TaskRejected {
        task: String,
        backend: String,
        reason: String,
    },

    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("task {task} timed out after {timeout:?}")]
    Timeout { task: String, timeout: Duration },

    #[error("backend {backend} failed to run task {task}: {reason}")]
    BackendFailed {
        task: String,
        backend: String,
        reason: String,
    },

    #[error("task {task} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        task: String,
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    #[error(transparent)]
    Assertion(#[from] AssertionError),

    #[error("panic in task {task}: {message}")]
    TaskPanicked { task: String, message: String },
}

/// Error returned from a workflow run, pointing at the step that failed.
///
/// The step name is `"DAG"` when the failure came from graph validation
/// rather than an individual task.
#[derive(Error, Debug)]
#[error("error in step '{step}' of workflow '{workflow}': {source}")]
pub struct WorkflowError {
    pub step: String,
    pub workflow: String,
    #[source]
    pub source: EngineError,
}

impl WorkflowError {
    pub fn new(step: impl Into<String>, workflow: impl Into<String>, source: EngineError) -> Self {
        Self {
            step: step.into(),
            workflow: workflow.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let err = WorkflowError::new(
            "build",
            "release",
            EngineError::EmptyCommand {
                task: "build".to_string(),
            },
        );

        assert_eq!(
            err.to_string(),
            "error in step 'build' of workflow 'release': task build has no command"
        );
    }

    #[test]
    fn test_timeout_error_mentions_duration() {
        let err = EngineError::Timeout {
            task: "slow".to_string(),
            timeout: Duration::from_millis(500),
        };

        assert!(err.to_string().contains("timed out after 500ms"));
    }

    #[test]
    fn test_retries_exhausted_wraps_source() {
        let err = EngineError::RetriesExhausted {
            task: "flaky".to_string(),
            attempts: 3,
            source: Box::new(EngineError::Timeout {
                task: "flaky".to_string(),
                timeout: Duration::from_secs(2),
            }),
        };

        let message = err.to_string();
        assert!(message.contains("failed after 3 attempts"));
        assert!(message.contains("timed out after 2s"));
    }
}
