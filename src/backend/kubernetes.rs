// ABOUTME: Cluster backend running tasks in throwaway kubernetes pods via kubectl
// ABOUTME: Requires a task image; available when the kubectl CLI is on PATH

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{capture_with_deadline, is_on_path, Backend, BackendStatus};
use crate::assertions::run_assertions;
use crate::engine::{EngineError, Task};

/// Runs tasks as one-shot pods and waits for completion.
pub struct KubernetesBackend;

#[async_trait]
impl Backend for KubernetesBackend {
    async fn run(&self, task: &mut Task) -> Result<(), EngineError> {
        self.validate(task)?;

        let mut shell_command = task.command.clone();
        if !task.args.is_empty() {
            shell_command.push(' ');
            shell_command.push_str(&task.args.join(" "));
        }

        let pod_name = format!(
            "caravan-{}-{}",
            task.name.to_lowercase().replace('_', "-"),
            std::process::id()
        );

        let mut command = Command::new("kubectl");
        command.args([
            "run",
            &pod_name,
            "--image",
            task.image.as_deref().unwrap_or_default(),
            "--restart",
            "Never",
            "--rm",
            "--attach",
            "--command",
            "--",
            "sh",
            "-c",
            &shell_command,
        ]);
        debug!(task = %task.name, pod = %pod_name, "kubectl run");

        capture_with_deadline(command, task).await?;
        if task.output.exit_code != 0 {
            return Err(EngineError::BackendFailed {
                task: task.name.clone(),
                backend: "kubernetes".to_string(),
                reason: format!(
                    "kubectl run exited with {}: {}",
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
                backend: "kubernetes".to_string(),
                reason: "an image is required".to_string(),
            });
        }
        if task.command.is_empty() {
            return Err(EngineError::TaskRejected {
                task: task.name.clone(),
                backend: "kubernetes".to_string(),
                reason: "a command is required".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn status(&self) -> BackendStatus {
        if is_on_path("kubectl") {
            BackendStatus::Available
        } else {
            BackendStatus::Unavailable
        }
    }
}
