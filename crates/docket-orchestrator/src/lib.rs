//! Task-graph orchestration for multi-agent legal workflows.
//!
//! Tasks form a validated dependency graph. The [`Orchestrator`] dispatches
//! every task whose dependencies have succeeded to its agent, bounded by a
//! concurrency limit, with per-task timeouts and retry budgets. Outputs land
//! in a write-once [`ContextStore`]; the run ends in a deterministic [`Report`].
//!
//! # Main types
//!
//! - [`Orchestrator`]: validates the graph and drives a run to completion.
//! - [`TaskGraph`]: dependency graph with topological order and readiness queries.
//! - [`ContextStore`]: write-once, versioned key/value store with producer attribution.
//! - [`RetryPolicy`]: exponential backoff with jitter and per-agent budgets.
//! - [`Report`]: final statuses, outputs and summary of a run.
//! - [`AgentMonitor`]: per-agent state and metrics.

/// Write-once context store.
pub mod context;
/// Orchestration engine.
pub mod engine;
/// Task dependency graph.
pub mod graph;
/// Agent state and metrics monitoring.
pub mod monitor;
/// Built-in pipeline profiles.
pub mod profiles;
/// Report aggregation.
pub mod report;
/// Retry policy and task budgets.
pub mod retry;
/// Run configuration, task statuses and the attempt audit trail.
pub mod types;

pub use context::{ContextEntry, ContextStore, Producer};
pub use engine::Orchestrator;
pub use graph::TaskGraph;
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use profiles::{
    legal_research_pipeline, matter_chat_pipeline, matter_query_pipeline, PipelineProfile,
    MATTER_QUERY_TOOL, SQL_RUNNER_AGENT,
};
pub use report::{aggregate, Report};
pub use retry::{RetryPolicy, TaskBudget};
pub use types::{
    AbortReason, Attempt, AttemptOutcome, ErrorKind, OrchestratorConfig, RunConfig, RunOutcome,
    RunStatus, TaskStatus,
};
