use crate::matter_db::MatterDatabase;
use async_trait::async_trait;
use docket_agent::{ToolAdapter, ToolDescriptor};
use docket_core::{CancellationSignal, ToolError};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Tool adapter that runs read-only SQL against the matters database.
pub struct MatterQueryTool {
    descriptor: ToolDescriptor,
    db: Arc<MatterDatabase>,
}

impl MatterQueryTool {
    /// Registered tool name.
    pub const NAME: &'static str = "matter_query";

    /// Tool over `db`.
    pub fn new(db: Arc<MatterDatabase>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME.to_string(),
                description: "Run a read-only SQL query against the legal matters table `matters` \
                    (columns: Id, Display_Name, Client_Name, Client_Full_Name, Record_Type_Name, \
                    Case_Type, Status, Case_Stage, Open_Date, Closed_Date, Attorney_Name, \
                    Assistant_Name). Returns one JSON object per row."
                    .to_string(),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "sql": {
                            "type": "string",
                            "description": "A single SELECT statement"
                        }
                    },
                    "required": ["sql"]
                }),
            },
            db,
        }
    }
}

#[async_trait]
impl ToolAdapter for MatterQueryTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, arguments: Value, cancel: &CancellationSignal) -> Result<Value, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::retryable("cancelled before query started"));
        }

        let sql = arguments["sql"].as_str().unwrap_or_default().trim().to_string();
        if sql.is_empty() {
            return Err(ToolError::permanent("missing `sql` argument"));
        }

        info!(sql = %sql, "Querying matters");
        let db = Arc::clone(&self.db);
        let rows = tokio::task::spawn_blocking(move || db.query(&sql))
            .await
            .map_err(|e| ToolError::retryable(format!("query worker failed: {e}")))?
            .map_err(|e| ToolError::permanent(e.to_string()))?;

        Ok(Value::Array(rows))
    }
}
