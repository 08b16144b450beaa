//! Built-in tools and agents for docket.
//!
//! - [`MatterDatabase`]: in-memory SQLite table of legal matters, seeded with sample data
//!   or loaded from a CSV export.
//! - [`MatterQueryTool`]: the `matter_query` tool adapter over that database.
//! - [`QueryAgent`]: runs model-generated SQL with a fallback query.

/// In-memory legal matters database.
pub mod matter_db;
/// `matter_query` tool adapter.
pub mod matter_query;
/// Deterministic SQL execution agent.
pub mod query_agent;

pub use matter_db::{MatterDatabase, MatterDbError, LITIFY_HEADERS, MATTER_COLUMNS};
pub use matter_query::MatterQueryTool;
pub use query_agent::{clean_sql, is_no_query, QueryAgent, FALLBACK_QUERY, NO_QUERY_MARKER};

use docket_agent::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools backed by `db`.
pub fn register_builtins(registry: &mut ToolRegistry, db: Arc<MatterDatabase>) {
    registry.register(Arc::new(MatterQueryTool::new(db)));
}
