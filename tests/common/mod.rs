// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides hook recording and YAML workflow builders shared across test files

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use caravan::engine::Task;

/// Records hook invocations as `"<prefix>:<task>"` entries in arrival order.
#[derive(Clone, Default)]
pub struct HookLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self, prefix: &str) -> impl Fn(&Task) + Send + Sync + 'static {
        let entries = Arc::clone(&self.entries);
        let prefix = prefix.to_string();
        move |task: &Task| {
            entries
                .lock()
                .unwrap()
                .push(format!("{}:{}", prefix, task.name));
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        let wanted = format!("{}:", prefix);
        self.entries()
            .into_iter()
            .filter(|entry| entry.starts_with(&wanted))
            .collect()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|logged| logged == entry)
    }

    pub fn index_of(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|logged| logged == entry)
    }
}

/// Builds workflow YAML documents for parser and end-to-end tests.
pub struct TestWorkflowBuilder {
    name: String,
    backend: Option<String>,
    env: Vec<(String, String)>,
    steps: Vec<String>,
}

impl TestWorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            backend: None,
            env: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn backend(mut self, backend: &str) -> Self {
        self.backend = Some(backend.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn add_echo_step(self, name: &str, message: &str, depends: &[&str]) -> Self {
        let mut step = format!(
            "  - name: {}\n    command: echo\n    args: [{:?}]\n",
            name, message
        );
        if !depends.is_empty() {
            step.push_str(&format!("    depends: [{}]\n", depends.join(", ")));
        }
        step.push_str("    raw_asserts:\n      - exit_code: 0\n");
        self.add_raw_step(step)
    }

    pub fn add_failing_step(self, name: &str, depends: &[&str]) -> Self {
        let mut step = format!(
            "  - name: {}\n    command: sh\n    args: [\"-c\", \"exit 1\"]\n",
            name
        );
        if !depends.is_empty() {
            step.push_str(&format!("    depends: [{}]\n", depends.join(", ")));
        }
        step.push_str("    raw_asserts:\n      - exit_code: 0\n");
        self.add_raw_step(step)
    }

    pub fn add_raw_step(mut self, step: String) -> Self {
        self.steps.push(step);
        self
    }

    pub fn to_yaml(&self) -> String {
        let mut yaml = format!("name: {}\n", self.name);
        if let Some(backend) = &self.backend {
            yaml.push_str(&format!("backend: {}\n", backend));
        }
        if !self.env.is_empty() {
            yaml.push_str("env_map:\n");
            for (key, value) in &self.env {
                yaml.push_str(&format!("  {}: {}\n", key, value));
            }
        }
        yaml.push_str("steps:\n");
        for step in &self.steps {
            yaml.push_str(step);
        }
        yaml
    }

    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_yaml())
    }
}
