// ABOUTME: Container backend running tasks inside docker containers
// ABOUTME: Requires a task image; available when the docker CLI is on PATH

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{capture_with_deadline, is_on_path, Backend, BackendStatus};
use crate::assertions::run_assertions;
use crate::engine::{EngineError, Task};

/// Runs tasks in throwaway docker containers.
pub struct DockerBackend;

#[async_trait]
impl Backend for DockerBackend {
    async fn run(&self, task: &mut Task) -> Result<(), EngineError> {
        self.validate(task)?;

        let mut args: Vec<String> = vec!["run".to_string(), "--rm".to_string()];
        if let Some(dir) = &task.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        for (key, value) in &task.env_map {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        // validate() guarantees the image is present.
        args.push(task.image.clone().unwrap_or_default());
        args.push(task.command.clone());
        args.extend(task.args.iter().cloned());

        let mut command = Command::new("docker");
        command.args(&args);
        debug!(task = %task.name, image = ?task.image, "docker run");

        capture_with_deadline(command, task).await?;
        if task.output.exit_code != 0 {
            return Err(EngineError::BackendFailed {
                task: task.name.clone(),
                backend: "docker".to_string(),
                reason: format!(
                    "docker run exited with {}: {}",
                    task.output.exit_code, task.output.output
                ),
            });
        }

        run_assertions(task)?;
        Ok(())
    }

    fn validate(&self, task: &Task) -> Result<(), EngineError> {
        if task.image.as_deref().map_or(true, str::is_empty) {
            return Err(EngineError::TaskRejected {
                task: task.name.clone(),
                backend: "docker".to_string(),
                reason: "an image is required".to_string(),
            });
        }
        if task.command.is_empty() {
            return Err(EngineError::TaskRejected {
                task: task.name.clone(),
                backend: "docker".to_string(),
                reason: "a command is required".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "docker"
    }

    fn status(&self) -> BackendStatus {
        if is_on_path("docker") {
            BackendStatus::Available
        } else {
            BackendStatus::Unavailable
        }
    }
}
