// ABOUTME: Backend trait and process-wide registry for task executors
// ABOUTME: Built-in backends run tasks locally, in containers, or in cluster pods

pub mod bash;
pub mod docker;
pub mod kubernetes;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::error;

use crate::engine::{EngineError, Task};

pub use bash::BashBackend;
pub use docker::DockerBackend;
pub use kubernetes::KubernetesBackend;

/// Whether a backend can currently run tasks on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Available,
    Unavailable,
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendStatus::Available => write!(f, "available"),
            BackendStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A task execution plugin. Implementations must be safe to call
/// concurrently on distinct task objects.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Executes the task, populating its output fields. Returns an error
    /// when the attempt is to be considered failed.
    async fn run(&self, task: &mut Task) -> Result<(), EngineError>;

    /// Fails fast when the task cannot be used with this backend.
    fn validate(&self, _task: &Task) -> Result<(), EngineError> {
        Ok(())
    }

    fn name(&self) -> &'static str;

    fn status(&self) -> BackendStatus;
}

static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn Backend>>>> = OnceLock::new();

/// The built-in backends are seeded on first access, so lookups work without
/// any explicit initialization call.
fn registry() -> &'static RwLock<HashMap<String, Arc<dyn Backend>>> {
    REGISTRY.get_or_init(|| {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("bash".to_string(), Arc::new(BashBackend));
        backends.insert("docker".to_string(), Arc::new(DockerBackend));
        backends.insert("kubernetes".to_string(), Arc::new(KubernetesBackend));
        RwLock::new(backends)
    })
}

/// Registers a backend by name, overwriting any existing entry. Entries live
/// for the process lifetime.
pub fn register_backend(name: impl Into<String>, backend: Arc<dyn Backend>) {
    registry()
        .write()
        .expect("backend registry poisoned")
        .insert(name.into(), backend);
}

/// Looks up a backend by name.
pub fn get_backend(name: &str) -> Option<Arc<dyn Backend>> {
    registry()
        .read()
        .expect("backend registry poisoned")
        .get(name)
        .cloned()
}

/// Names of all registered backends, for diagnostics.
pub fn backend_names() -> Vec<String> {
    registry()
        .read()
        .expect("backend registry poisoned")
        .keys()
        .cloned()
        .collect()
}

pub(crate) fn is_on_path(binary: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
}

/// Spawns the prepared command under the task's deadline and captures its
/// combined output and exit code into the task.
///
/// On deadline expiry the child is killed and a timeout error whose message
/// names the duration is returned. A process that merely exits non-zero is
/// not an error here; assertions decide failure for completed runs.
pub(crate) async fn capture_with_deadline(
    mut command: Command,
    task: &mut Task,
) -> Result<(), EngineError> {
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    task.output.started_at = Some(Utc::now());

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            task.output.exit_code = -1;
            task.output.error = err.to_string();
            task.output.finished_at = Some(Utc::now());
            error!(task = %task.name, error = %err, "failed to spawn process");
            return Err(EngineError::SpawnFailed {
                command: task.command.clone(),
                source: err,
            });
        }
    };

    match timeout(task.timeout, child.wait_with_output()).await {
        Err(_) => {
            // Dropping the timed-out future kills the child via kill_on_drop.
            let err = EngineError::Timeout {
                task: task.name.clone(),
                timeout: task.timeout,
            };
            task.output.exit_code = -1;
            task.output.error = err.to_string();
            task.output.finished_at = Some(Utc::now());
            error!(task = %task.name, timeout = ?task.timeout, "task timed out");
            Err(err)
        }
        Ok(Err(err)) => {
            task.output.exit_code = -1;
            task.output.error = err.to_string();
            task.output.finished_at = Some(Utc::now());
            Err(EngineError::SpawnFailed {
                command: task.command.clone(),
                source: err,
            })
        }
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            task.output.output = combined;
            task.output.exit_code = output.status.code().unwrap_or(-1);
            if !output.status.success() {
                task.output.error = output.status.to_string();
            }
            task.output.finished_at = Some(Utc::now());
            Ok(())
        }
    }
}
