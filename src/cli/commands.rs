// ABOUTME: Command implementations for the caravan CLI
// ABOUTME: Runs, validates, and inspects workflows loaded from YAML files

use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::backend;
use crate::engine::Dag;
use crate::parser::WorkflowSpec;

pub async fn run_workflow(path: &Path) -> crate::Result<()> {
    let mut workflow = WorkflowSpec::from_file(path)
        .with_context(|| format!("failed to load workflow from {}", path.display()))?
        .into_workflow()?;

    workflow.run().await?;

    info!(workflow = %workflow.name, "workflow succeeded");
    for task in &workflow.steps {
        info!(task = %task.name, exit_code = task.output.exit_code, "task finished");
    }
    Ok(())
}

pub fn validate_workflow(path: &Path) -> crate::Result<()> {
    let workflow = WorkflowSpec::from_file(path)
        .with_context(|| format!("failed to load workflow from {}", path.display()))?
        .into_workflow()?;

    let dag = Dag::new();
    for task in &workflow.steps {
        dag.add(task.clone())?;
    }
    dag.validate()?;

    println!(
        "{}: {} steps, dependency graph OK",
        workflow.name,
        workflow.steps.len()
    );
    Ok(())
}

pub fn list_backends() {
    let mut names = backend::backend_names();
    names.sort();
    for name in names {
        if let Some(handle) = backend::get_backend(&name) {
            println!("{}\t{}", handle.name(), handle.status());
        }
    }
}
