use crate::types::{AgentId, ContextKey, TaskId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`DocketError`].
pub type DocketResult<T> = Result<T, DocketError>;

/// Top-level error type for the docket workspace.
#[derive(Debug, Error)]
pub enum DocketError {
    /// The task graph definition is malformed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The context store contract was violated.
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// Configuration or run inputs are unusable.
    #[error("Config error: {0}")]
    Config(String),
}

/// Raised while building a task graph, before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two task definitions share an id.
    #[error("duplicate task id `{0}`")]
    DuplicateTask(TaskId),

    /// A task depends on a task that does not exist.
    #[error("task `{task}` depends on unknown task `{dependency}`")]
    UnknownDependency {
        /// The task declaring the dependency.
        task: TaskId,
        /// The missing dependency.
        dependency: TaskId,
    },

    /// A task is assigned to an agent that is not registered.
    #[error("task `{task}` is assigned to unknown agent `{agent}`")]
    UnknownAgent {
        /// The task referencing the agent.
        task: TaskId,
        /// The missing agent.
        agent: AgentId,
    },

    /// The dependency relation contains a cycle.
    #[error("dependency cycle among tasks: {}", join_ids(.tasks))]
    Cycle {
        /// Tasks that could not be placed in a topological order.
        tasks: Vec<TaskId>,
    },

    /// A task reads a key no transitive dependency produces.
    #[error("task `{task}` reads `{key}`, which no transitive dependency produces")]
    UnproducedInput {
        /// The reading task.
        task: TaskId,
        /// The key nobody upstream writes.
        key: ContextKey,
    },

    /// Two producers declare the same output key.
    #[error("output key `{key}` is declared by both `{first}` and `{second}`")]
    DuplicateOutput {
        /// The contested key.
        key: ContextKey,
        /// The first producer (a task id, or `input` for run inputs).
        first: String,
        /// The second producer.
        second: String,
    },
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Violations of the write-once context store contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The key was already written during this run.
    #[error("context key `{key}` was already written by {producer}")]
    DuplicateKey {
        /// The key written twice.
        key: ContextKey,
        /// Who wrote it first.
        producer: String,
    },

    /// A snapshot requested a key that has not been written.
    #[error("context key `{0}` has not been written")]
    MissingKey(ContextKey),
}

/// Failure surfaced by an agent to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Retryable: backend timeout, rate limit, retryable tool failure.
    #[error("transient: {message}")]
    Transient {
        /// Human-readable cause.
        message: String,
        /// When set, the task only gets the reduced retry budget.
        reduced_budget: bool,
    },

    /// The result does not match the task contract. Never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Unrecoverable. Aborts the whole run.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl AgentError {
    /// Transient failure with the full retry budget.
    pub fn transient(message: impl Into<String>) -> Self {
        AgentError::Transient {
            message: message.into(),
            reduced_budget: false,
        }
    }

    /// Whether the orchestrator may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transient { .. })
    }
}

/// Failure category reported by a model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// The provider throttled the request.
    RateLimited,
    /// The request did not complete in time.
    Timeout,
    /// Credentials were rejected.
    Auth,
    /// Anything else.
    Unknown,
}

/// Error returned by `ModelBackend::complete`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    /// Failure category.
    pub kind: BackendErrorKind,
    /// Provider message.
    pub message: String,
}

impl BackendError {
    /// Creates a backend error of the given kind.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<BackendError> for AgentError {
    fn from(err: BackendError) -> Self {
        match err.kind {
            BackendErrorKind::RateLimited | BackendErrorKind::Timeout => AgentError::Transient {
                message: err.to_string(),
                reduced_budget: false,
            },
            BackendErrorKind::Auth => AgentError::Fatal(err.to_string()),
            BackendErrorKind::Unknown => AgentError::Transient {
                message: err.to_string(),
                reduced_budget: true,
            },
        }
    }
}

/// Error returned by a tool adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolError {
    /// What went wrong.
    pub message: String,
    /// Whether retrying the whole task may help.
    pub retryable: bool,
}

impl ToolError {
    /// A failure worth retrying (network blip, busy resource).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will recur on retry (bad arguments, rejected query).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}
