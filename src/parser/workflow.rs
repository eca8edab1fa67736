// ABOUTME: Declarative YAML surface for workflows and their steps
// ABOUTME: Deserializes workflow files and converts them into engine types

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ParserError, Result};
use crate::assertions::{self, AssertionFn};
use crate::engine::{Task, Workflow};

/// A workflow definition as written in a YAML file.
///
/// ```yaml
/// name: smoke
/// backend: bash
/// env_map:
///   REGION: local
/// steps:
///   - name: greet
///     command: echo
///     args: ["hello"]
///     timeout: 5s
///     raw_asserts:
///       - exit_code: 0
///       - output_contains: hello
///   - name: follow-up
///     command: echo
///     args: ["world"]
///     depends: [greet]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub env_map: HashMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, with = "humantime_serde")]
    pub retry_delay: Option<Duration>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub env_map: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default, alias = "asserts")]
    pub raw_asserts: Vec<AssertSpec>,
}

/// One assertion entry. Exactly the fields that are set become assertions;
/// `skip_json_nodes` qualifies `output_json_equals` in the same entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AssertSpec {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output_equals: Option<String>,
    #[serde(default)]
    pub output_contains: Option<String>,
    #[serde(default)]
    pub output_json_equals: Option<String>,
    #[serde(default)]
    pub skip_json_nodes: Vec<String>,
    #[serde(default)]
    pub output_matches_regexp: Option<String>,
}

impl WorkflowSpec {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: WorkflowSpec = serde_yaml::from_str(content)?;
        spec.validate_structure()?;
        Ok(spec)
    }

    fn validate_structure(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ParserError::UnnamedStep { index });
            }
            if !names.insert(step.name.clone()) {
                return Err(ParserError::DuplicateStep(step.name.clone()));
            }
        }
        Ok(())
    }

    /// Converts the parsed definition into a runnable [`Workflow`].
    pub fn into_workflow(self) -> Result<Workflow> {
        let mut workflow = Workflow::new(self.name);
        if let Some(backend) = self.backend {
            workflow.backend = backend;
        }
        workflow.env_map = self.env_map;
        for step in self.steps {
            let task = step.into_task()?;
            workflow.steps.push(task);
        }
        Ok(workflow)
    }
}

impl StepSpec {
    fn into_task(self) -> Result<Task> {
        let mut task = Task::new(self.name);
        task.command = self.command;
        task.args = self.args;
        task.depends = self.depends;
        task.env_map = self.env_map;
        task.working_dir = self.working_dir;
        task.image = self.image;
        task.backend = self.backend;
        if let Some(timeout) = self.timeout {
            task.timeout = timeout;
        }
        if self.retries > 0 {
            task.retries = self.retries;
        }
        if let Some(delay) = self.retry_delay {
            task.retry_delay = delay;
        }
        for spec in self.raw_asserts {
            let assertions = spec.into_assertions();
            if assertions.is_empty() {
                return Err(ParserError::EmptyAssertion {
                    step: task.name.clone(),
                });
            }
            task.asserts.extend(assertions);
        }
        Ok(task)
    }
}

impl AssertSpec {
    fn into_assertions(self) -> Vec<AssertionFn> {
        let mut built = Vec::new();
        if let Some(code) = self.exit_code {
            built.push(assertions::exit_code(code));
        }
        if let Some(expected) = self.output_equals {
            built.push(assertions::output_equals(expected));
        }
        if let Some(expected) = self.output_contains {
            built.push(assertions::output_contains(expected));
        }
        if let Some(expected) = self.output_json_equals {
            built.push(assertions::output_json_equals(
                expected,
                self.skip_json_nodes,
            ));
        }
        if let Some(pattern) = self.output_matches_regexp {
            built.push(assertions::output_matches(pattern));
        }
        built
    }
}

/// Loads a workflow from a YAML file, ready to run.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    WorkflowSpec::from_file(path)?.into_workflow()
}
