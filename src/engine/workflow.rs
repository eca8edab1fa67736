// ABOUTME: Workflow model owning tasks, defaults, and lifecycle hooks
// ABOUTME: Orchestrates a run: defaults, DAG build and validation, parallel scheduling

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use super::dag::Dag;
use super::error::{EngineError, WorkflowError};
use super::scheduler::DagScheduler;
use super::task::{Task, DEFAULT_BACKEND};

/// Callback fired at a task lifecycle point.
pub type TaskHook = Arc<dyn Fn(&Task) + Send + Sync>;
/// Callback fired when a task attempt fails, with the error that failed it.
pub type TaskFailureHook = Arc<dyn Fn(&Task, &EngineError) + Send + Sync>;

/// Registered lifecycle callbacks, invoked in registration order. The lists
/// are frozen once a run starts; workers call them without any engine lock
/// held.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_start: Vec<TaskHook>,
    pub(crate) on_success: Vec<TaskHook>,
    pub(crate) on_failure: Vec<TaskFailureHook>,
    pub(crate) on_complete: Vec<TaskHook>,
}

impl Hooks {
    pub(crate) fn fire_start(&self, task: &Task) {
        for hook in &self.on_start {
            hook(task);
        }
    }

    pub(crate) fn fire_success(&self, task: &Task) {
        for hook in &self.on_success {
            hook(task);
        }
    }

    pub(crate) fn fire_failure(&self, task: &Task, err: &EngineError) {
        for hook in &self.on_failure {
            hook(task, err);
        }
    }

    pub(crate) fn fire_complete(&self, task: &Task) {
        for hook in &self.on_complete {
            hook(task);
        }
    }
}

/// An ordered collection of tasks executed over their dependency graph.
pub struct Workflow {
    /// Workflow name; an empty name is replaced with a generated identifier
    /// on the first run.
    pub name: String,
    pub steps: Vec<Task>,
    /// Default backend for tasks that do not name their own.
    pub backend: String,
    /// Workflow-wide environment, inherited by tasks with an empty env_map.
    pub env_map: HashMap<String, String>,
    hooks: Hooks,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            backend: DEFAULT_BACKEND.to_string(),
            env_map: HashMap::new(),
            hooks: Hooks::default(),
        }
    }

    pub fn add_task(mut self, task: Task) -> Self {
        self.steps.push(task);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_map.insert(key.into(), value.into());
        self
    }

    pub fn default_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn add_on_task_start(&mut self, hook: impl Fn(&Task) + Send + Sync + 'static) {
        self.hooks.on_start.push(Arc::new(hook));
    }

    pub fn add_on_task_success(&mut self, hook: impl Fn(&Task) + Send + Sync + 'static) {
        self.hooks.on_success.push(Arc::new(hook));
    }

    pub fn add_on_task_failure(
        &mut self,
        hook: impl Fn(&Task, &EngineError) + Send + Sync + 'static,
    ) {
        self.hooks.on_failure.push(Arc::new(hook));
    }

    pub fn add_on_task_complete(&mut self, hook: impl Fn(&Task) + Send + Sync + 'static) {
        self.hooks.on_complete.push(Arc::new(hook));
    }

    /// Runs the workflow to completion or first failure.
    ///
    /// Steps are validated and linearized into a DAG, then executed in
    /// parallel respecting dependencies. On return, every step that ran has
    /// its output fields populated for inspection, whether or not the run
    /// succeeded.
    pub async fn run(&mut self) -> Result<(), WorkflowError> {
        if self.name.is_empty() {
            self.name = format!("workflow-{}", Uuid::new_v4());
            debug!(workflow = %self.name, "generated workflow name");
        }
        if self.backend.is_empty() {
            self.backend = DEFAULT_BACKEND.to_string();
        }
        info!(workflow = %self.name, steps = self.steps.len(), "starting workflow");

        for task in &mut self.steps {
            if task.backend.as_deref().map_or(true, str::is_empty) {
                task.backend = Some(self.backend.clone());
            }
            if task.env_map.is_empty() && !self.env_map.is_empty() {
                task.env_map = self.env_map.clone();
            }
            if task.command.is_empty() {
                return Err(WorkflowError::new(
                    task.name.clone(),
                    self.name.clone(),
                    EngineError::EmptyCommand {
                        task: task.name.clone(),
                    },
                ));
            }
        }

        let dag = Dag::new();
        for task in &self.steps {
            dag.add(task.clone()).map_err(|source| {
                WorkflowError::new(task.name.clone(), self.name.clone(), source)
            })?;
        }
        dag.validate()
            .map_err(|source| WorkflowError::new("DAG", self.name.clone(), source))?;
        let order = dag
            .topological_order()
            .map_err(|source| WorkflowError::new("DAG", self.name.clone(), source))?;

        let scheduler = DagScheduler::new(self.name.clone(), self.hooks.clone(), order);
        let (first_error, mut outputs) = scheduler.run().await;

        for task in &mut self.steps {
            if let Some(output) = outputs.remove(&task.name) {
                task.output = output;
            }
        }

        match first_error {
            Some(err) => {
                error!(workflow = %self.name, error = %err, "workflow failed");
                Err(err)
            }
            None => {
                info!(workflow = %self.name, "workflow completed");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("steps", &self.steps.len())
            .finish()
    }
}
