// ABOUTME: Local shell backend running tasks as child processes on the host
// ABOUTME: Merges task environment over the process environment and applies the task deadline

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{capture_with_deadline, Backend, BackendStatus};
use crate::assertions::run_assertions;
use crate::engine::{EngineError, Task};

/// Runs tasks as local child processes. Always available.
pub struct BashBackend;

#[async_trait]
impl Backend for BashBackend {
    async fn run(&self, task: &mut Task) -> Result<(), EngineError> {
        let mut command = Command::new(&task.command);
        command.args(&task.args);

        // Child env is the process environment with env_map overlaid on top.
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(task.env_map.clone());
        command.env_clear();
        command.envs(&env);

        if let Some(dir) = &task.working_dir {
            command.current_dir(dir);
        }

        debug!(task = %task.name, command = %task.command, args = ?task.args, "spawning");
        capture_with_deadline(command, task).await?;

        run_assertions(task)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "bash"
    }

    fn status(&self) -> BackendStatus {
        BackendStatus::Available
    }
}
