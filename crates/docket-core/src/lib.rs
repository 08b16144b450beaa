//! Core types and error definitions for the docket orchestration engine.
//!
//! This crate provides the foundational types shared across all docket crates:
//! identifiers, task definitions, the immutable context [`Snapshot`] handed to
//! agents, tool call abstractions, cooperative cancellation, and the error
//! taxonomy.
//!
//! # Main types
//!
//! - [`DocketError`]: Unified error enum for all docket subsystems.
//! - [`GraphError`], [`ContextError`], [`AgentError`]: Contract violations and
//!   agent failures, classified the way the orchestrator acts on them.
//! - [`BackendError`], [`ToolError`]: Failures surfaced by external collaborators.
//! - [`Task`]: An atomic unit of work assigned to one agent.
//! - [`Snapshot`]: Read-only view of the context store.
//! - [`CancellationSignal`]: Cooperative cancellation flag.

/// Cooperative cancellation.
pub mod cancel;
/// Error taxonomy.
pub mod error;
/// Transcript messages.
pub mod message;
/// Tool call request/response types.
pub mod tool;
/// Identifiers, tasks and snapshots.
pub mod types;

pub use cancel::CancellationSignal;
pub use error::{
    AgentError, BackendError, BackendErrorKind, ContextError, DocketError, DocketResult,
    GraphError, ToolError,
};
pub use message::{Message, Role};
pub use tool::{ToolCall, ToolResult};
pub use types::{AgentId, ContextKey, Snapshot, Task, TaskId, TaskOutput, Value};
