// ABOUTME: Workflow execution engine module for caravan
// ABOUTME: Holds the task model, DAG, parallel scheduler, and workflow orchestration

pub mod dag;
pub mod error;
pub mod scheduler;
pub mod task;
pub mod workflow;

pub use dag::Dag;
pub use error::{EngineError, WorkflowError};
pub use task::{default_task_timeout, Task, TaskOutput, DEFAULT_BACKEND};
pub use workflow::{TaskFailureHook, TaskHook, Workflow};
