use crate::context::ContextStore;
use crate::graph::TaskGraph;
use crate::monitor::AgentMonitor;
use crate::report::aggregate;
use crate::retry::{RetryPolicy, TaskBudget};
use crate::types::{
    AbortReason, Attempt, AttemptOutcome, ErrorKind, OrchestratorConfig, RunConfig, RunOutcome,
    TaskStatus,
};
use chrono::{DateTime, Utc};
use docket_agent::{Agent, AgentRegistry};
use docket_core::{
    AgentError, CancellationSignal, ContextKey, DocketResult, GraphError, Snapshot, Task, TaskId,
    TaskOutput, Value,
};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The orchestration engine.
///
/// Walks a validated task graph, dispatching every ready task to its agent
/// with a timeout and retry budget, commits outputs to the write-once
/// context store, and aggregates the result into a [`crate::Report`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    agents: Arc<AgentRegistry>,
    monitor: Arc<AgentMonitor>,
}

impl Orchestrator {
    /// Create an orchestrator over a fixed set of agents.
    pub fn new(config: OrchestratorConfig, agents: AgentRegistry) -> Self {
        Self {
            config,
            agents: Arc::new(agents),
            monitor: Arc::new(AgentMonitor::new()),
        }
    }

    /// Get a reference to the monitor.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Retry policy and concurrency limit in effect.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Build the graph and check every task's agent is registered.
    pub fn validate<I>(&self, tasks: Vec<Task>, inputs: I) -> Result<TaskGraph, GraphError>
    where
        I: IntoIterator<Item = ContextKey>,
    {
        let graph = TaskGraph::build_with_inputs(tasks, inputs)?;
        graph.check_agents(|id| self.agents.contains(id))?;
        Ok(graph)
    }

    /// Run the tasks and inputs of a [`RunConfig`].
    pub async fn run_config(&self, config: RunConfig) -> DocketResult<RunOutcome> {
        self.run(config.tasks, config.inputs).await
    }

    /// Run the graph with no external cancellation.
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        inputs: BTreeMap<ContextKey, Value>,
    ) -> DocketResult<RunOutcome> {
        self.run_with_cancel(tasks, inputs, CancellationSignal::new())
            .await
    }

    /// Run the graph to completion, or until `cancel` fires.
    ///
    /// Graph errors are returned before anything is dispatched. Everything
    /// that happens after dispatch starts, including aborts, is reported
    /// through the returned [`RunOutcome`].
    pub async fn run_with_cancel(
        &self,
        tasks: Vec<Task>,
        inputs: BTreeMap<ContextKey, Value>,
        cancel: CancellationSignal,
    ) -> DocketResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let graph = self.validate(tasks, inputs.keys().cloned())?;
        let mut store = ContextStore::new();
        for (key, value) in inputs {
            store.seed(key, value)?;
        }
        for id in self.agents.ids() {
            self.monitor.register(id).await;
        }

        info!(
            run_id = %run_id,
            tasks = graph.len(),
            inputs = store.len(),
            concurrency = self.config.concurrency_limit,
            "Run started"
        );

        let mut state = RunState::new(&graph, store);
        let audit = Arc::new(Mutex::new(Vec::new()));
        self.execute(&mut state, &audit, &cancel).await;

        let report = aggregate(&graph, &state.store, &state.statuses, state.abort.as_ref());
        let attempts = std::mem::take(&mut *audit.lock());
        let finished_at = Utc::now();

        info!(
            run_id = %run_id,
            status = %report.status,
            attempts = attempts.len(),
            summary = %report.summary,
            "Run finished"
        );

        Ok(RunOutcome {
            run_id,
            report,
            attempts,
            started_at,
            finished_at,
        })
    }

    async fn execute(
        &self,
        state: &mut RunState<'_>,
        audit: &Arc<Mutex<Vec<Attempt>>>,
        cancel: &CancellationSignal,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let run_cancel = CancellationSignal::new();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut workers: JoinSet<(TaskId, Result<TaskOutput, TaskFailure>)> = JoinSet::new();

        loop {
            if state.abort.is_none() {
                for id in state.dispatchable() {
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        break;
                    };
                    let ctx = JobContext {
                        cancel: run_cancel.clone(),
                        audit: Arc::clone(audit),
                        progress: progress_tx.clone(),
                    };
                    self.dispatch(state, &id, permit, ctx, &mut workers);
                    if state.abort.is_some() {
                        break;
                    }
                }
            }

            if state.abort.is_none() && workers.is_empty() {
                if !state.all_final() {
                    let pending = state.pending();
                    error!(pending = pending.len(), "No task can make progress");
                    state.abort = Some(AbortReason::Deadlock { pending });
                }
            }
            if state.abort.is_some() || workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Run cancelled by caller");
                    state.abort = Some(AbortReason::Cancelled);
                }
                Some((id, attempt)) = progress_rx.recv() => state.mark_attempt(&id, attempt),
                Some(joined) = workers.join_next() => match joined {
                    Ok((id, result)) => state.settle(id, result),
                    Err(e) => {
                        error!(error = %e, "Worker lost");
                        state.abort = Some(AbortReason::WorkerLost { message: e.to_string() });
                    }
                },
            }
        }

        if let Some(reason) = &state.abort {
            error!(reason = %reason, in_flight = workers.len(), "Aborting run");
            run_cancel.cancel();
            while let Some(joined) = workers.join_next().await {
                if let Ok((id, _)) = joined {
                    debug!(task = %id, "Discarding result after abort");
                }
            }
            state.mark_aborted();
        }
    }

    fn dispatch(
        &self,
        state: &mut RunState<'_>,
        id: &TaskId,
        permit: OwnedSemaphorePermit,
        ctx: JobContext,
        workers: &mut JoinSet<(TaskId, Result<TaskOutput, TaskFailure>)>,
    ) {
        let graph = state.graph;
        let Some(task) = graph.get(id) else {
            return;
        };
        let Some(agent) = self.agents.get(&task.agent_id) else {
            let message = format!("agent `{}` is not registered", task.agent_id);
            state.fail(id.clone(), TaskFailure::new(ErrorKind::Fatal, message, false));
            return;
        };

        let inputs = match state.store.read_view(&task.input_keys) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(task = %id, error = %e, "Cannot build input snapshot");
                state.statuses.insert(
                    id.clone(),
                    TaskStatus::Failed {
                        reason: e.to_string(),
                        kind: ErrorKind::Fatal,
                    },
                );
                state.abort = Some(AbortReason::ContextViolation {
                    task: id.clone(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let job = Job {
            task: task.clone(),
            agent: Arc::clone(agent),
            inputs,
            budget: self.config.retry.budget_for(agent.spec()),
            policy: self.config.retry.clone(),
            monitor: Arc::clone(&self.monitor),
            ctx,
        };

        info!(
            task = %id,
            agent = %task.agent_id,
            timeout_ms = job.budget.timeout.as_millis(),
            max_retries = job.budget.max_retries,
            "Dispatching task"
        );
        state
            .statuses
            .insert(id.clone(), TaskStatus::Running { attempt: 1 });

        let task_id = id.clone();
        workers.spawn(async move {
            let _permit = permit;
            let result = job.run().await;
            (task_id, result)
        });
    }
}

/// Mutable state of one run, owned by the dispatch loop.
///
/// The loop is the only writer of the context store, so a `&mut` borrow is
/// all the mutual exclusion the store needs.
struct RunState<'g> {
    graph: &'g TaskGraph,
    store: ContextStore,
    statuses: BTreeMap<TaskId, TaskStatus>,
    completed: BTreeSet<TaskId>,
    abort: Option<AbortReason>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g TaskGraph, store: ContextStore) -> Self {
        let statuses = graph
            .tasks()
            .map(|t| (t.id.clone(), TaskStatus::Pending))
            .collect();
        Self {
            graph,
            store,
            statuses,
            completed: BTreeSet::new(),
            abort: None,
        }
    }

    /// Ready, still-pending tasks in topological order.
    fn dispatchable(&self) -> Vec<TaskId> {
        let ready = self.graph.ready_tasks(&self.completed);
        self.graph
            .order()
            .iter()
            .filter(|id| ready.contains(*id))
            .filter(|id| matches!(self.statuses.get(*id), Some(TaskStatus::Pending)))
            .cloned()
            .collect()
    }

    fn all_final(&self) -> bool {
        self.statuses.values().all(TaskStatus::is_final)
    }

    fn pending(&self) -> Vec<TaskId> {
        self.statuses
            .iter()
            .filter(|(_, s)| matches!(s, TaskStatus::Pending))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn mark_attempt(&mut self, id: &TaskId, attempt: u32) {
        if let Some(status) = self.statuses.get_mut(id) {
            if matches!(status, TaskStatus::Running { .. }) {
                *status = TaskStatus::Running { attempt };
            }
        }
    }

    fn settle(&mut self, id: TaskId, result: Result<TaskOutput, TaskFailure>) {
        if !matches!(self.statuses.get(&id), Some(TaskStatus::Running { .. })) {
            warn!(task = %id, "Discarding result for a task that is no longer running");
            return;
        }
        match result {
            Ok(outputs) => self.commit(id, outputs),
            Err(failure) => self.fail(id, failure),
        }
    }

    fn commit(&mut self, id: TaskId, outputs: TaskOutput) {
        for (key, value) in outputs {
            if let Err(e) = self.store.write(key, value, &id) {
                error!(task = %id, error = %e, "Context store rejected task output");
                self.statuses.insert(
                    id.clone(),
                    TaskStatus::Failed {
                        reason: e.to_string(),
                        kind: ErrorKind::Fatal,
                    },
                );
                self.abort = Some(AbortReason::ContextViolation {
                    task: id,
                    message: e.to_string(),
                });
                return;
            }
        }
        info!(task = %id, version = self.store.version(), "Task succeeded");
        self.statuses.insert(id.clone(), TaskStatus::Succeeded);
        self.completed.insert(id);
    }

    fn fail(&mut self, id: TaskId, failure: TaskFailure) {
        warn!(task = %id, kind = %failure.kind, error = %failure.message, "Task failed");
        self.statuses.insert(
            id.clone(),
            TaskStatus::Failed {
                reason: failure.message.clone(),
                kind: failure.kind,
            },
        );
        if failure.kind == ErrorKind::Fatal {
            self.abort = Some(AbortReason::Fatal {
                task: id,
                message: failure.message,
            });
            return;
        }
        self.skip_dependents(&id);
    }

    fn skip_dependents(&mut self, id: &TaskId) {
        let reason = format!("dependency `{id}` did not succeed");
        let mut skipped = 0;
        for dependent in self.graph.dependents_transitive(id) {
            let Some(status) = self.statuses.get_mut(&dependent) else {
                continue;
            };
            if matches!(status, TaskStatus::Pending) {
                *status = TaskStatus::Skipped {
                    reason: reason.clone(),
                };
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!(task = %id, skipped, "Skipping dependents of failed task");
        }
    }

    fn mark_aborted(&mut self) {
        for status in self.statuses.values_mut() {
            match status {
                TaskStatus::Running { .. } => {
                    *status = TaskStatus::Failed {
                        reason: "run aborted while task was in flight".to_string(),
                        kind: ErrorKind::Cancelled,
                    };
                }
                TaskStatus::Pending => {
                    *status = TaskStatus::Skipped {
                        reason: "run aborted".to_string(),
                    };
                }
                _ => {}
            }
        }
    }
}

/// Why a task's last attempt did not produce outputs.
#[derive(Debug, Clone, PartialEq)]
struct TaskFailure {
    kind: ErrorKind,
    message: String,
    reduced_budget: bool,
}

impl TaskFailure {
    fn new(kind: ErrorKind, message: impl Into<String>, reduced_budget: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            reduced_budget,
        }
    }

    fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled", false)
    }

    fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::new(ErrorKind::Panicked, format!("agent panicked: {detail}"), false)
    }

    fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::Timeout)
    }
}

impl From<AgentError> for TaskFailure {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Transient {
                message,
                reduced_budget,
            } => Self::new(ErrorKind::Transient, message, reduced_budget),
            AgentError::Validation(message) => Self::new(ErrorKind::Validation, message, false),
            AgentError::Fatal(message) => Self::new(ErrorKind::Fatal, message, false),
        }
    }
}

/// Run-wide handles shared by every job.
struct JobContext {
    cancel: CancellationSignal,
    audit: Arc<Mutex<Vec<Attempt>>>,
    progress: mpsc::UnboundedSender<(TaskId, u32)>,
}

/// One dispatched task: the retry loop around `Agent::run`.
struct Job {
    task: Task,
    agent: Arc<dyn Agent>,
    inputs: Snapshot,
    budget: TaskBudget,
    policy: RetryPolicy,
    monitor: Arc<AgentMonitor>,
    ctx: JobContext,
}

impl Job {
    async fn run(self) -> Result<TaskOutput, TaskFailure> {
        let agent_id = self.task.agent_id.clone();
        let mut attempt: u32 = 1;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(TaskFailure::cancelled());
            }
            // The receiver lives as long as the run loop.
            let _ = self.ctx.progress.send((self.task.id.clone(), attempt));

            let started_at = Utc::now();
            let clock = Instant::now();
            self.monitor.attempt_started(&agent_id).await;
            let result = self.attempt().await;
            let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.monitor
                .attempt_finished(&agent_id, duration_ms, result.as_ref().err().map(|f| f.kind))
                .await;
            self.record(attempt, started_at, &result);

            let failure = match result {
                Ok(outputs) => return Ok(outputs),
                Err(failure) => failure,
            };
            if !failure.is_retryable() || !self.budget.allows_retry(attempt, failure.reduced_budget)
            {
                return Err(failure);
            }

            let delay = self.policy.backoff_delay(attempt - 1);
            warn!(
                task = %self.task.id,
                attempt,
                kind = %failure.kind,
                error = %failure.message,
                delay_ms = delay.as_millis(),
                "Attempt failed, retrying after backoff"
            );
            self.monitor.backing_off(&agent_id).await;
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Err(TaskFailure::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(&self) -> Result<TaskOutput, TaskFailure> {
        let attempt_cancel = CancellationSignal::new();
        let call = tokio::time::timeout(
            self.budget.timeout,
            AssertUnwindSafe(self.agent.run(&self.task, &self.inputs, &attempt_cancel))
                .catch_unwind(),
        );

        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {
                attempt_cancel.cancel();
                Err(TaskFailure::cancelled())
            }
            outcome = call => match outcome {
                Err(_) => {
                    attempt_cancel.cancel();
                    Err(TaskFailure::new(
                        ErrorKind::Timeout,
                        format!("timed out after {} ms", self.budget.timeout.as_millis()),
                        false,
                    ))
                }
                Ok(Err(panic)) => Err(TaskFailure::panicked(panic.as_ref())),
                Ok(Ok(Ok(outputs))) => check_outputs(&self.task, outputs),
                Ok(Ok(Err(e))) => Err(TaskFailure::from(e)),
            },
        }
    }

    fn record(&self, attempt: u32, started_at: DateTime<Utc>, result: &Result<TaskOutput, TaskFailure>) {
        let outcome = match result {
            Ok(outputs) => AttemptOutcome::Success {
                outputs: outputs.clone(),
            },
            Err(f) => AttemptOutcome::Failure {
                kind: f.kind,
                message: f.message.clone(),
            },
        };
        self.ctx.audit.lock().push(Attempt {
            task_id: self.task.id.clone(),
            agent_id: self.task.agent_id.clone(),
            attempt_number: attempt,
            started_at,
            ended_at: Utc::now(),
            outcome,
        });
    }
}

/// The outputs must match the declared output keys exactly.
fn check_outputs(task: &Task, outputs: TaskOutput) -> Result<TaskOutput, TaskFailure> {
    if let Some(missing) = task.output_keys.iter().find(|k| !outputs.contains_key(*k)) {
        return Err(TaskFailure::new(
            ErrorKind::Validation,
            format!("result is missing declared output `{missing}`"),
            false,
        ));
    }
    if let Some(extra) = outputs.keys().find(|k| !task.output_keys.contains(*k)) {
        return Err(TaskFailure::new(
            ErrorKind::Validation,
            format!("result contains undeclared output `{extra}`"),
            false,
        ));
    }
    Ok(outputs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_check_outputs_exact() {
        let task = Task::new("draft", "drafter").writes(["draft_document"]);
        let ok = TaskOutput::from([(ContextKey::from("draft_document"), Value::from("text"))]);
        assert!(check_outputs(&task, ok).is_ok());

        let missing = check_outputs(&task, TaskOutput::new()).unwrap_err();
        assert_eq!(missing.kind, ErrorKind::Validation);

        let extra = TaskOutput::from([
            (ContextKey::from("draft_document"), Value::from("text")),
            (ContextKey::from("notes"), Value::from("x")),
        ]);
        let err = check_outputs(&task, extra).unwrap_err();
        assert!(err.message.contains("undeclared output `notes`"));
    }

    #[test]
    fn test_agent_error_classification() {
        let f = TaskFailure::from(AgentError::Transient {
            message: "502".into(),
            reduced_budget: true,
        });
        assert!(f.is_retryable());
        assert!(f.reduced_budget);
        assert!(!TaskFailure::from(AgentError::Validation("x".into())).is_retryable());
        assert_eq!(TaskFailure::from(AgentError::Fatal("auth".into())).kind, ErrorKind::Fatal);
    }

    #[test]
    fn test_panic_payload_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("index out of bounds");
        let f = TaskFailure::panicked(payload.as_ref());
        assert_eq!(f.kind, ErrorKind::Panicked);
        assert_eq!(f.message, "agent panicked: index out of bounds");
    }

    #[test]
    fn test_run_state_skips_transitive_dependents() {
        let graph = TaskGraph::build(vec![
            Task::new("a", "x").writes(["k1"]),
            Task::new("b", "x").reads(["k1"]).writes(["k2"]).after(["a"]),
            Task::new("c", "x").reads(["k2"]).after(["b"]),
            Task::new("d", "x"),
        ])
        .unwrap();
        let mut state = RunState::new(&graph, ContextStore::new());
        state.statuses.insert(TaskId::from("a"), TaskStatus::Running { attempt: 1 });
        state.settle(
            TaskId::from("a"),
            Err(TaskFailure::new(ErrorKind::Validation, "bad", false)),
        );
        assert!(matches!(state.statuses[&TaskId::from("b")], TaskStatus::Skipped { .. }));
        assert!(matches!(state.statuses[&TaskId::from("c")], TaskStatus::Skipped { .. }));
        assert_eq!(state.statuses[&TaskId::from("d")], TaskStatus::Pending);
        assert!(state.abort.is_none());
        assert_eq!(state.dispatchable(), vec![TaskId::from("d")]);
    }

    #[test]
    fn test_late_result_is_discarded() {
        let graph = TaskGraph::build(vec![Task::new("a", "x").writes(["k"])]).unwrap();
        let mut state = RunState::new(&graph, ContextStore::new());
        state.statuses.insert(
            TaskId::from("a"),
            TaskStatus::Failed {
                reason: "timed out".into(),
                kind: ErrorKind::Timeout,
            },
        );
        state.settle(
            TaskId::from("a"),
            Ok(TaskOutput::from([(ContextKey::from("k"), Value::from("late"))])),
        );
        assert!(state.store.is_empty());
    }

    #[test]
    fn test_duplicate_write_aborts_as_context_violation() {
        let graph = TaskGraph::build(vec![Task::new("a", "x").writes(["k"])]).unwrap();
        let mut store = ContextStore::new();
        store
            .write(ContextKey::from("k"), Value::from("first"), &TaskId::from("a"))
            .unwrap();
        let mut state = RunState::new(&graph, store);
        state.statuses.insert(TaskId::from("a"), TaskStatus::Running { attempt: 2 });
        state.settle(
            TaskId::from("a"),
            Ok(TaskOutput::from([(ContextKey::from("k"), Value::from("second"))])),
        );
        assert!(matches!(state.abort, Some(AbortReason::ContextViolation { .. })));
        assert_eq!(state.store.value(&ContextKey::from("k")), Some(&Value::from("first")));
    }
}
