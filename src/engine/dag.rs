// ABOUTME: Directed acyclic graph of tasks keyed by unique names
// ABOUTME: Supports out-of-order insertion, validation, and topological ordering

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::Graph;

use super::error::EngineError;
use super::task::Task;

/// A task plus its declared dependency names.
pub struct TaskNode {
    pub name: String,
    pub task: Task,
    pub deps: Vec<String>,
}

#[derive(Default)]
struct DagInner {
    nodes: HashMap<String, TaskNode>,
    /// Forward edges: name -> names that depend on it.
    edges: HashMap<String, Vec<String>>,
}

/// A thread-safe dependency graph. Tasks may be added in any order;
/// dependency existence is only checked by [`Dag::validate`].
pub struct Dag {
    inner: RwLock<DagInner>,
}

impl Dag {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DagInner::default()),
        }
    }

    /// Inserts a task, rejecting empty and duplicate names.
    pub fn add(&self, task: Task) -> Result<(), EngineError> {
        if task.name.is_empty() {
            return Err(EngineError::UnnamedTask);
        }
        let mut inner = self.inner.write().expect("dag lock poisoned");
        if inner.nodes.contains_key(&task.name) {
            return Err(EngineError::DuplicateTask(task.name));
        }

        let name = task.name.clone();
        inner.edges.entry(name.clone()).or_default();
        for dep in &task.depends {
            inner.edges.entry(dep.clone()).or_default().push(name.clone());
        }
        inner.nodes.insert(
            name.clone(),
            TaskNode {
                name,
                deps: task.depends.clone(),
                task,
            },
        );
        Ok(())
    }

    /// Verifies that every referenced dependency exists and that the graph
    /// is acyclic. A task depending on itself is a cycle of length one.
    pub fn validate(&self) -> Result<(), EngineError> {
        let inner = self.inner.read().expect("dag lock poisoned");

        for node in inner.nodes.values() {
            for dep in &node.deps {
                if !inner.nodes.contains_key(dep) {
                    return Err(EngineError::MissingDependency {
                        task: node.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        let mut graph: Graph<&str, ()> = Graph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
        for name in inner.nodes.keys() {
            indices.insert(name.as_str(), graph.add_node(name.as_str()));
        }
        for node in inner.nodes.values() {
            for dep in &node.deps {
                graph.add_edge(indices[dep.as_str()], indices[node.name.as_str()], ());
            }
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| EngineError::CycleDetected(graph[cycle.node_id()].to_string()))
    }

    /// Returns tasks in topological order using Kahn's algorithm over a copy
    /// of the in-degrees. Missing dependencies and cycles are reported.
    pub fn topological_order(&self) -> Result<Vec<Task>, EngineError> {
        let inner = self.inner.read().expect("dag lock poisoned");

        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(inner.nodes.len());
        for node in inner.nodes.values() {
            for dep in &node.deps {
                if !inner.nodes.contains_key(dep) {
                    return Err(EngineError::MissingDependency {
                        task: node.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
            in_degree.insert(node.name.as_str(), node.deps.len());
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(inner.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(inner.nodes[current].task.clone());
            if let Some(dependents) = inner.edges.get(current) {
                for dependent in dependents {
                    let degree = in_degree
                        .get_mut(dependent.as_str())
                        .expect("dependent registered at insert");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != inner.nodes.len() {
            let stuck = in_degree
                .iter()
                .find(|(_, degree)| **degree > 0)
                .map(|(name, _)| name.to_string())
                .unwrap_or_default();
            return Err(EngineError::CycleDetected(stuck));
        }
        Ok(order)
    }

    /// Dependency names for a task, if it exists.
    pub fn dependencies(&self, name: &str) -> Option<Vec<String>> {
        let inner = self.inner.read().expect("dag lock poisoned");
        inner.nodes.get(name).map(|node| node.deps.clone())
    }

    /// Names of tasks that depend on the given task, if it exists.
    pub fn dependents(&self, name: &str) -> Option<Vec<String>> {
        let inner = self.inner.read().expect("dag lock poisoned");
        if !inner.nodes.contains_key(name) {
            return None;
        }
        Some(inner.edges.get(name).cloned().unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("dag lock poisoned").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, deps: &[&str]) -> Task {
        Task::new(name).command("true").depends_on(deps.to_vec())
    }

    #[test]
    fn test_add_rejects_duplicates_and_leaves_dag_unchanged() {
        let dag = Dag::new();
        dag.add(named("a", &[])).unwrap();

        let err = dag.add(named("a", &["b"])).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(dag.len(), 1);
        assert_eq!(dag.dependencies("a").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_add_accepts_out_of_order_dependencies() {
        let dag = Dag::new();
        dag.add(named("b", &["a"])).unwrap();
        dag.add(named("a", &[])).unwrap();
        assert!(dag.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_dependency() {
        let dag = Dag::new();
        dag.add(named("b", &["ghost"])).unwrap();

        let err = dag.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "dependency ghost for task b does not exist"
        );
    }

    #[test]
    fn test_validate_self_dependency_is_cycle() {
        let dag = Dag::new();
        dag.add(named("loop", &["loop"])).unwrap();

        let err = dag.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_validate_three_cycle() {
        let dag = Dag::new();
        dag.add(named("a", &["c"])).unwrap();
        dag.add(named("b", &["a"])).unwrap();
        dag.add(named("c", &["b"])).unwrap();

        let err = dag.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));

        let err = dag.topological_order().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let dag = Dag::new();
        dag.add(named("a", &[])).unwrap();
        dag.add(named("b", &["a"])).unwrap();
        dag.add(named("c", &["a"])).unwrap();
        dag.add(named("d", &["b", "c"])).unwrap();

        let order = dag.topological_order().unwrap();
        assert_eq!(order.len(), 4);

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(index, task)| (task.name.as_str(), index))
            .collect();
        assert!(position["a"] < position["b"]);
        assert!(position["a"] < position["c"]);
        assert!(position["b"] < position["d"]);
        assert!(position["c"] < position["d"]);
    }

    #[test]
    fn test_dependency_queries() {
        let dag = Dag::new();
        dag.add(named("a", &[])).unwrap();
        dag.add(named("b", &["a"])).unwrap();
        dag.add(named("c", &["a"])).unwrap();

        assert_eq!(dag.dependencies("b").unwrap(), vec!["a"]);
        let mut dependents = dag.dependents("a").unwrap();
        dependents.sort();
        assert_eq!(dependents, vec!["b", "c"]);
        assert!(dag.dependencies("ghost").is_none());
        assert!(dag.dependents("ghost").is_none());
    }
}
