use crate::report::Report;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use docket_agent::AgentSpec;
use docket_core::{AgentId, ContextKey, Task, TaskId, TaskOutput, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Status of a task within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its dependencies or a free slot.
    Pending,
    /// Dispatched to its agent.
    Running {
        /// Current attempt, 1-based.
        attempt: u32,
    },
    /// Outputs committed to the context store.
    Succeeded,
    /// Gave up after its last attempt.
    Failed {
        /// Message of the last failure.
        reason: String,
        /// Classification of the last failure.
        kind: ErrorKind,
    },
    /// Never dispatched.
    Skipped {
        /// Failed dependency or abort that prevented dispatch.
        reason: String,
    },
}

impl TaskStatus {
    /// Succeeded, Failed or Skipped.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
        )
    }

    /// True only for `Succeeded`.
    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task succeeded.
    Completed,
    /// Some tasks failed or were skipped, at least one succeeded.
    PartiallyFailed,
    /// No task succeeded.
    Failed,
    /// Stopped early on a fatal error, deadlock, context violation or cancellation.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::PartiallyFailed => write!(f, "partially_failed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Failure classification recorded for attempts and failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable agent or backend failure.
    Transient,
    /// The attempt exceeded its timeout. Retryable.
    Timeout,
    /// Output broke the task contract. Not retried.
    Validation,
    /// Unrecoverable. Aborts the run.
    Fatal,
    /// Stopped by cancellation or an abort.
    Cancelled,
    /// The agent panicked. Fails the task without retry.
    Panicked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The agent returned outputs that passed the contract check.
    Success {
        /// Outputs as returned by the agent.
        outputs: TaskOutput,
    },
    /// The attempt failed.
    Failure {
        /// Failure classification.
        kind: ErrorKind,
        /// Failure message.
        message: String,
    },
}

/// One invocation of an agent for a task, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Task the attempt ran for.
    pub task_id: TaskId,
    /// Agent that ran it.
    pub agent_id: AgentId,
    /// 1-based.
    pub attempt_number: u32,
    /// When the agent was invoked.
    pub started_at: DateTime<Utc>,
    /// When the attempt settled.
    pub ended_at: DateTime<Utc>,
    /// Success or failure.
    pub outcome: AttemptOutcome,
}

impl Attempt {
    /// Whether the attempt produced outputs.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }
}

/// Why a run stopped before every task reached a final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// An agent returned a fatal error.
    Fatal {
        /// Task whose agent failed.
        task: TaskId,
        /// Agent error message.
        message: String,
    },
    /// Nothing is running or ready but tasks remain pending.
    Deadlock {
        /// Tasks left pending.
        pending: Vec<TaskId>,
    },
    /// The context store rejected a write or a read.
    ContextViolation {
        /// Task whose outputs or inputs were rejected.
        task: TaskId,
        /// Store error message.
        message: String,
    },
    /// The caller cancelled the run.
    Cancelled,
    /// A worker was lost without reporting back.
    WorkerLost {
        /// Join error message.
        message: String,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Fatal { task, message } => {
                write!(f, "fatal error in task `{task}`: {message}")
            }
            AbortReason::Deadlock { pending } => {
                let ids: Vec<&str> = pending.iter().map(TaskId::as_str).collect();
                write!(f, "deadlock: no task can make progress ({})", ids.join(", "))
            }
            AbortReason::ContextViolation { task, message } => {
                write!(f, "context violation in task `{task}`: {message}")
            }
            AbortReason::Cancelled => write!(f, "run cancelled"),
            AbortReason::WorkerLost { message } => write!(f, "worker lost: {message}"),
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retry, backoff and timeout settings.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Maximum number of tasks executing at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

fn default_concurrency_limit() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

/// Everything a run needs: agent definitions, the task graph, retry policy,
/// concurrency limit and external inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Engine settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Agent definitions.
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    /// Task definitions.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Values seeded into the context store before dispatch.
    #[serde(default)]
    pub inputs: BTreeMap<ContextKey, Value>,
}

/// Result of `Orchestrator::run`: the report plus the attempt audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Unique per run.
    pub run_id: Uuid,
    /// Final report.
    pub report: Report,
    /// Every attempt, in the order they settled.
    pub attempts: Vec<Attempt>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Attempts made for one task, in order.
    pub fn attempts_for(&self, task: &TaskId) -> Vec<&Attempt> {
        self.attempts.iter().filter(|a| &a.task_id == task).collect()
    }
}
