// ABOUTME: Event-driven parallel scheduler executing a topologically ordered DAG
// ABOUTME: Dispatches ready tasks to spawned workers with panic isolation and first-error cancellation

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{EngineError, WorkflowError};
use super::task::{Task, TaskOutput};
use super::workflow::Hooks;

/// Safety net against lost wake-ups: the driver re-checks completion on
/// this period even when no event arrives.
const WATCHDOG_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
enum SchedulerEvent {
    Ready(String),
    Done,
    Cancel,
}

type SharedTask = Arc<tokio::sync::Mutex<Task>>;

struct SchedulerState {
    in_degree: HashMap<String, usize>,
    started: HashSet<String>,
    completed: HashSet<String>,
    first_error: Option<WorkflowError>,
    cancelled: bool,
}

struct SchedulerShared {
    workflow: String,
    hooks: Hooks,
    tasks: HashMap<String, SharedTask>,
    dependents: HashMap<String, Vec<String>>,
    state: Mutex<SchedulerState>,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<SchedulerEvent>,
    done_tx: mpsc::Sender<()>,
}

/// One-shot scheduler for a single workflow run. Construct from a
/// topologically ordered task list, call [`DagScheduler::run`], dispose.
pub(crate) struct DagScheduler {
    shared: Arc<SchedulerShared>,
    events_rx: mpsc::Receiver<SchedulerEvent>,
    done_rx: mpsc::Receiver<()>,
}

impl DagScheduler {
    pub(crate) fn new(workflow: String, hooks: Hooks, order: Vec<Task>) -> Self {
        let mut tasks = HashMap::with_capacity(order.len());
        let mut in_degree = HashMap::with_capacity(order.len());
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for task in order {
            in_degree.insert(task.name.clone(), task.depends.len());
            for dep in &task.depends {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(task.name.clone());
            }
            tasks.insert(task.name.clone(), Arc::new(tokio::sync::Mutex::new(task)));
        }

        // Each task enqueues at most one ready event and one done marker.
        let (events_tx, events_rx) = mpsc::channel(tasks.len().max(1) * 2);
        let (done_tx, done_rx) = mpsc::channel(1);

        Self {
            shared: Arc::new(SchedulerShared {
                workflow,
                hooks,
                tasks,
                dependents,
                state: Mutex::new(SchedulerState {
                    in_degree,
                    started: HashSet::new(),
                    completed: HashSet::new(),
                    first_error: None,
                    cancelled: false,
                }),
                cancel: CancellationToken::new(),
                events_tx,
                done_tx,
            }),
            events_rx,
            done_rx,
        }
    }

    /// Drives the DAG to completion or cancellation. Returns the first error
    /// to arrive, if any, along with the captured output of every task.
    pub(crate) async fn run(mut self) -> (Option<WorkflowError>, HashMap<String, TaskOutput>) {
        {
            let state = self.shared.state.lock().expect("scheduler state poisoned");
            for (name, degree) in &state.in_degree {
                if *degree == 0 {
                    let _ = self
                        .shared
                        .events_tx
                        .try_send(SchedulerEvent::Ready(name.clone()));
                }
            }
        }

        if self.shared.tasks.is_empty() {
            debug!(workflow = %self.shared.workflow, "no tasks to run, exiting immediately");
            return (None, HashMap::new());
        }

        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    self.mark_cancelled();
                    debug!(workflow = %self.shared.workflow, "cancellation observed, leaving main loop");
                    break;
                }
                _ = self.done_rx.recv() => {
                    debug!(workflow = %self.shared.workflow, "done signal, leaving main loop");
                    break;
                }
                event = self.events_rx.recv() => match event {
                    Some(SchedulerEvent::Ready(name)) => self.handle_ready(&name),
                    Some(SchedulerEvent::Done) => {
                        debug!(workflow = %self.shared.workflow, "all tasks completed");
                        break;
                    }
                    Some(SchedulerEvent::Cancel) | None => {
                        self.mark_cancelled();
                        break;
                    }
                },
                _ = sleep(WATCHDOG_TICK) => {
                    let all_completed = {
                        let state = self.shared.state.lock().expect("scheduler state poisoned");
                        state.completed.len() == self.shared.tasks.len()
                    };
                    if all_completed {
                        let _ = self.shared.events_tx.try_send(SchedulerEvent::Done);
                    }
                }
            }
        }

        self.collect().await
    }

    fn mark_cancelled(&self) {
        self.shared
            .state
            .lock()
            .expect("scheduler state poisoned")
            .cancelled = true;
    }

    /// Dispatches a worker for a ready task. Unknown or already started
    /// names are dropped.
    fn handle_ready(&self, name: &str) {
        let task = {
            let Some(task) = self.shared.tasks.get(name) else {
                return;
            };
            let mut state = self.shared.state.lock().expect("scheduler state poisoned");
            if !state.started.insert(name.to_string()) {
                return;
            }
            Arc::clone(task)
        };

        debug!(workflow = %self.shared.workflow, task = %name, "dispatching worker");
        tokio::spawn(run_task(
            Arc::clone(&self.shared),
            name.to_string(),
            task,
        ));
    }

    /// Waits for every in-flight worker to release its task, then snapshots
    /// the outputs. Workers hold the task lock for the duration of a run, so
    /// this returns once remaining tasks finish naturally or hit their
    /// timeout.
    async fn collect(self) -> (Option<WorkflowError>, HashMap<String, TaskOutput>) {
        let mut outputs = HashMap::with_capacity(self.shared.tasks.len());
        for (name, task) in &self.shared.tasks {
            let guard = task.lock().await;
            outputs.insert(name.clone(), guard.output.clone());
        }
        let mut state = self.shared.state.lock().expect("scheduler state poisoned");
        if state.cancelled {
            debug!(
                workflow = %self.shared.workflow,
                completed = state.completed.len(),
                total = self.shared.tasks.len(),
                "run was cancelled before all tasks completed"
            );
        }
        (state.first_error.take(), outputs)
    }
}

/// Worker for a single task. Fires lifecycle hooks, records completion and
/// the first error, and releases dependents. A panic anywhere in the run
/// (including assertions and hooks) is converted into a task failure.
async fn run_task(shared: Arc<SchedulerShared>, name: String, task: SharedTask) {
    let run_result = AssertUnwindSafe(async {
        {
            let guard = task.lock().await;
            shared.hooks.fire_start(&guard);
        }
        let mut guard = task.lock().await;
        guard.run().await
    })
    .catch_unwind()
    .await;

    let error = match run_result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(panic) => {
            warn!(workflow = %shared.workflow, task = %name, "worker panicked");
            Some(EngineError::TaskPanicked {
                task: name.clone(),
                message: panic_message(panic),
            })
        }
    };
    let failed = error.is_some();

    match error {
        Some(err) => {
            {
                let guard = task.lock().await;
                shared.hooks.fire_failure(&guard, &err);
            }
            let mut state = shared.state.lock().expect("scheduler state poisoned");
            if state.first_error.is_none() {
                state.first_error = Some(WorkflowError::new(
                    name.clone(),
                    shared.workflow.clone(),
                    err,
                ));
                drop(state);
                shared.cancel.cancel();
            } else {
                debug!(workflow = %shared.workflow, task = %name, error = %err,
                    "discarding error, an earlier failure already won");
            }
        }
        None => {
            let guard = task.lock().await;
            shared.hooks.fire_success(&guard);
        }
    }

    {
        let mut state = shared.state.lock().expect("scheduler state poisoned");
        state.completed.insert(name.clone());
        if state.completed.len() == shared.tasks.len() {
            let _ = shared.done_tx.try_send(());
        }
    }

    {
        let guard = task.lock().await;
        shared.hooks.fire_complete(&guard);
    }
    debug!(workflow = %shared.workflow, task = %name, "task completed");

    // Dependents of a failed task stay unsatisfied forever: nothing downstream
    // of a failure is ever dispatched. The run ends through cancellation.
    if failed {
        return;
    }

    let mut state = shared.state.lock().expect("scheduler state poisoned");
    if let Some(dependents) = shared.dependents.get(&name) {
        for dependent in dependents {
            let Some(degree) = state.in_degree.get_mut(dependent) else {
                continue;
            };
            *degree = degree.saturating_sub(1);
            if *degree == 0 && !state.started.contains(dependent) {
                let _ = shared
                    .events_tx
                    .try_send(SchedulerEvent::Ready(dependent.clone()));
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::AssertionError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn shell_task(name: &str, script: &str, deps: &[&str]) -> Task {
        Task::new(name)
            .command("sh")
            .args(["-c", script])
            .depends_on(deps.to_vec())
            .timeout(Duration::from_secs(10))
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |entry: &str| {
            sink.lock().unwrap().push(entry.to_string())
        })
    }

    fn hooks_recording_starts(calls: Arc<Mutex<Vec<String>>>) -> Hooks {
        let mut hooks = Hooks::default();
        hooks.on_start.push(Arc::new(move |task: &Task| {
            calls.lock().unwrap().push(task.name.clone());
        }));
        hooks
    }

    #[tokio::test]
    async fn test_empty_dag_returns_immediately() {
        let scheduler = DagScheduler::new("empty".to_string(), Hooks::default(), Vec::new());
        let (error, outputs) = scheduler.run().await;
        assert!(error.is_none());
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_independent_tasks_run_in_parallel() {
        let tasks = vec![
            shell_task("a", "sleep 0.2", &[]),
            shell_task("b", "sleep 0.2", &[]),
            shell_task("c", "sleep 0.2", &[]),
        ];
        let scheduler = DagScheduler::new("parallel".to_string(), Hooks::default(), tasks);

        let started = Instant::now();
        let (error, outputs) = scheduler.run().await;
        let elapsed = started.elapsed();

        assert!(error.is_none());
        assert_eq!(outputs.len(), 3);
        // Three 200ms sleeps running serially would need 600ms.
        assert!(
            elapsed < Duration::from_millis(500),
            "tasks did not overlap: {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_dependencies_order_dispatch() {
        let (calls, _) = recorder();
        let hooks = hooks_recording_starts(Arc::clone(&calls));
        let tasks = vec![
            shell_task("b", "true", &["a"]),
            shell_task("a", "true", &[]),
        ];

        let (error, _) = DagScheduler::new("deps".to_string(), hooks, tasks).run().await;
        assert!(error.is_none());
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_first_error_wins_and_propagates() {
        let mut failing = shell_task("boom", "true", &[]);
        failing.asserts.push(Arc::new(|_task: &Task| {
            Err(AssertionError::new("deliberate failure"))
        }));
        let tasks = vec![failing, shell_task("slow", "sleep 0.1", &[])];

        let (error, _) = DagScheduler::new("failing".to_string(), Hooks::default(), tasks)
            .run()
            .await;
        let error = error.unwrap();
        assert_eq!(error.step, "boom");
        assert!(error.to_string().contains("deliberate failure"));
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependents() {
        let (calls, _) = recorder();
        let hooks = hooks_recording_starts(Arc::clone(&calls));
        let mut failing = shell_task("gate", "true", &[]);
        failing
            .asserts
            .push(Arc::new(|_task: &Task| Err(AssertionError::new("nope"))));
        let tasks = vec![failing, shell_task("after", "true", &["gate"])];

        let (error, _) = DagScheduler::new("blocked".to_string(), hooks, tasks).run().await;
        assert!(error.is_some());
        assert_eq!(*calls.lock().unwrap(), vec!["gate"]);
    }

    #[tokio::test]
    async fn test_panic_in_assertion_is_isolated() {
        let mut task = shell_task("kaboom", "true", &[]);
        task.asserts
            .push(Arc::new(|_task: &Task| panic!("simulated panic")));

        let (error, _) = DagScheduler::new("panics".to_string(), Hooks::default(), vec![task])
            .run()
            .await;
        let error = error.unwrap();
        assert!(error.to_string().contains("panic in task kaboom"));
        assert!(error.to_string().contains("simulated panic"));
    }

    #[tokio::test]
    async fn test_hooks_fire_for_success_and_failure() {
        let (calls, push) = recorder();
        let mut hooks = Hooks::default();
        {
            let push = push.clone();
            hooks.on_start.push(Arc::new(move |task: &Task| {
                push(&format!("start:{}", task.name))
            }));
        }
        {
            let push = push.clone();
            hooks.on_success.push(Arc::new(move |task: &Task| {
                push(&format!("success:{}", task.name))
            }));
        }
        {
            let push = push.clone();
            hooks
                .on_failure
                .push(Arc::new(move |task: &Task, _err: &EngineError| {
                    push(&format!("failure:{}", task.name))
                }));
        }
        {
            let push = push.clone();
            hooks.on_complete.push(Arc::new(move |task: &Task| {
                push(&format!("complete:{}", task.name))
            }));
        }

        let mut failing = shell_task("bad", "true", &[]);
        failing
            .asserts
            .push(Arc::new(|_task: &Task| Err(AssertionError::new("fail"))));
        let tasks = vec![shell_task("good", "true", &[]), failing];

        let (error, _) = DagScheduler::new("hooks".to_string(), hooks, tasks).run().await;
        assert!(error.is_some());

        // Workers may still be finishing when the driver returns on cancel.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"start:good".to_string()));
        assert!(calls.contains(&"start:bad".to_string()));
        assert!(calls.contains(&"success:good".to_string()));
        assert!(calls.contains(&"failure:bad".to_string()));
        assert!(calls.contains(&"complete:good".to_string()));
        assert!(calls.contains(&"complete:bad".to_string()));
        assert!(!calls.contains(&"success:bad".to_string()));
        assert!(!calls.contains(&"failure:good".to_string()));
    }

    #[tokio::test]
    async fn test_external_cancel_event_stops_the_run() {
        let scheduler = DagScheduler::new(
            "cancelled".to_string(),
            Hooks::default(),
            vec![shell_task("sleeper", "sleep 0.5", &[])],
        );
        let events_tx = scheduler.shared.events_tx.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            let _ = events_tx.try_send(SchedulerEvent::Cancel);
        });

        let started = Instant::now();
        let (error, _) = scheduler.run().await;
        // The in-flight sleeper is allowed to finish naturally, nothing more.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_all_workers_finish_without_leaks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for index in 0..10 {
            let counter = Arc::clone(&counter);
            let mut task = shell_task(&format!("t{}", index), "true", &[]);
            task.asserts.push(Arc::new(move |_task: &Task| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
            tasks.push(task);
        }

        let run = DagScheduler::new("leak".to_string(), Hooks::default(), tasks).run();
        let (error, _) = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("scheduler did not terminate promptly");
        assert!(error.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
