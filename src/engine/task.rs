// ABOUTME: Task model and executor for single command execution units
// ABOUTME: Handles defaulting, backend resolution, and the retry loop around backend runs

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::EngineError;
use crate::assertions::AssertionFn;
use crate::backend;

/// Backend used when neither the task nor its workflow names one.
pub const DEFAULT_BACKEND: &str = "bash";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const TASK_TIMEOUT_ENV: &str = "IAPETUS_TASK_TIMEOUT";

static DEFAULT_TASK_TIMEOUT: OnceLock<Duration> = OnceLock::new();

/// Default per-task timeout, read once per process. `IAPETUS_TASK_TIMEOUT`
/// accepts a humantime duration string such as `45s` or `2m`.
pub fn default_task_timeout() -> Duration {
    *DEFAULT_TASK_TIMEOUT.get_or_init(|| {
        let Ok(raw) = std::env::var(TASK_TIMEOUT_ENV) else {
            return DEFAULT_TIMEOUT;
        };
        match humantime::parse_duration(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(value = %raw, error = %err, "ignoring invalid {}", TASK_TIMEOUT_ENV);
                DEFAULT_TIMEOUT
            }
        }
    })
}

/// Execution results captured by the backend that ran the task.
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    /// 0 on success, the process exit status when it exited, -1 otherwise
    /// (spawn failure, signal, timeout).
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub output: String,
    /// Error message for a failed attempt, empty otherwise.
    pub error: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A configurable command execution unit, run with retries and validated
/// against registered assertions.
#[derive(Clone)]
pub struct Task {
    /// Unique name within a workflow.
    pub name: String,
    /// Program to execute.
    pub command: String,
    pub args: Vec<String>,
    /// Names of tasks this one waits for.
    pub depends: Vec<String>,
    /// Maximum execution time for one attempt. Zero means "use the process
    /// default" and is filled in before the first attempt.
    pub timeout: Duration,
    /// Total attempts. Zero is normalized to 1 (a single attempt).
    pub retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Environment overlaid on the process environment, winning on collision.
    pub env_map: HashMap<String, String>,
    pub working_dir: Option<String>,
    /// Container image, consumed only by backends that need one.
    pub image: Option<String>,
    /// Backend name; `None` inherits the workflow default.
    pub backend: Option<String>,
    pub asserts: Vec<AssertionFn>,
    /// Populated by the backend that ran the task.
    pub output: TaskOutput,
}

impl Task {
    /// Creates a task. An empty name is replaced with a generated one.
    pub fn new(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if name.is_empty() {
            name = format!("task-{}", Uuid::new_v4());
        }
        Self {
            name,
            command: String::new(),
            args: Vec::new(),
            depends: Vec::new(),
            timeout: Duration::ZERO,
            retries: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
            env_map: HashMap::new(),
            working_dir: None,
            image: None,
            backend: None,
            asserts: Vec::new(),
            output: TaskOutput::default(),
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_map.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn assertion(mut self, assertion: AssertionFn) -> Self {
        self.asserts.push(assertion);
        self
    }

    /// Fills unset fields with their defaults. Idempotent. Rejects a task
    /// whose command is empty.
    pub fn ensure_defaults(&mut self) -> Result<(), EngineError> {
        if self.command.is_empty() {
            return Err(EngineError::EmptyCommand {
                task: self.name.clone(),
            });
        }
        if self.timeout.is_zero() {
            self.timeout = default_task_timeout();
        }
        if self.retries == 0 {
            self.retries = 1;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = DEFAULT_RETRY_DELAY;
        }
        if self.backend.as_deref().map_or(true, str::is_empty) {
            self.backend = Some(DEFAULT_BACKEND.to_string());
        }
        Ok(())
    }

    /// Executes the task: resolves its backend, validates against it, then
    /// runs up to `retries` attempts with `retry_delay` pauses in between.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.ensure_defaults()?;

        let backend_name = self
            .backend
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let backend =
            backend::get_backend(&backend_name).ok_or_else(|| EngineError::BackendNotFound {
                name: backend_name.clone(),
            })?;
        backend.validate(self)?;

        let attempts = self.retries;
        let mut attempt = 1;
        loop {
            debug!(task = %self.name, attempt, attempts, "running attempt");
            match backend.run(self).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    warn!(task = %self.name, attempt, error = %err, "attempt failed, retrying");
                    sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(EngineError::RetriesExhausted {
                        task: self.name.clone(),
                        attempts,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("depends", &self.depends)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("backend", &self.backend)
            .field("asserts", &self.asserts.len())
            .field("output", &self.output)
            .finish()
    }
}
