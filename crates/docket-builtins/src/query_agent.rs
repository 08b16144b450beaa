use async_trait::async_trait;
use docket_agent::{Agent, AgentSpec, ToolAdapter};
use docket_core::{
    AgentError, CancellationSignal, ContextKey, Snapshot, Task, TaskOutput, ToolError, Value,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Query run when the generated one fails or returns nothing.
pub const FALLBACK_QUERY: &str = "SELECT COUNT(*) as total FROM matters";

/// Prefix of a model reply that asks for no query, e.g. `NO_QUERY_NEEDED`.
pub const NO_QUERY_MARKER: &str = "NO_QUERY";

/// Deterministic agent that executes model-generated SQL.
///
/// Reads the SQL from `sql_input`, runs it through the query tool and writes
/// the rows to `rows_output` and the statement actually executed to
/// `sql_output`. Falls back to [`FALLBACK_QUERY`] when the generated query
/// is rejected or matches no rows. A reply starting with
/// [`NO_QUERY_MARKER`] runs nothing and yields no rows and an empty statement.
pub struct QueryAgent {
    spec: AgentSpec,
    tool: Arc<dyn ToolAdapter>,
    sql_input: ContextKey,
    rows_output: ContextKey,
    sql_output: ContextKey,
}

impl QueryAgent {
    /// Runner reading `sql_query` and writing `query_results` and `executed_sql`.
    pub fn new(spec: AgentSpec, tool: Arc<dyn ToolAdapter>) -> Self {
        Self {
            spec,
            tool,
            sql_input: ContextKey::from("sql_query"),
            rows_output: ContextKey::from("query_results"),
            sql_output: ContextKey::from("executed_sql"),
        }
    }

    /// Overrides the default context keys.
    pub fn with_keys(
        mut self,
        sql_input: impl Into<ContextKey>,
        rows_output: impl Into<ContextKey>,
        sql_output: impl Into<ContextKey>,
    ) -> Self {
        self.sql_input = sql_input.into();
        self.rows_output = rows_output.into();
        self.sql_output = sql_output.into();
        self
    }

    fn output(&self, task: &Task, rows: Value, sql: String) -> TaskOutput {
        task.output_keys
            .iter()
            .map(|key| {
                let value = if *key == self.rows_output {
                    rows.clone()
                } else {
                    Value::String(sql.clone())
                };
                (key.clone(), value)
            })
            .collect()
    }

    async fn execute(&self, sql: &str, cancel: &CancellationSignal) -> Result<Value, ToolError> {
        self.tool
            .invoke(serde_json::json!({ "sql": sql }), cancel)
            .await
    }
}

/// Strips the formatting models tend to wrap SQL in: code fences with an
/// optional `sql` tag and a leading `SQL:` or `Query:` label, in any case.
pub fn clean_sql(raw: &str) -> String {
    let mut unfenced = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find("```") {
        unfenced.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        rest = strip_prefix_ignore_case(rest, "sql").unwrap_or(rest);
    }
    unfenced.push_str(rest);

    let sql = unfenced.trim();
    let sql = strip_prefix_ignore_case(sql, "SQL:")
        .or_else(|| strip_prefix_ignore_case(sql, "Query:"))
        .unwrap_or(sql);
    sql.trim().to_string()
}

/// True when the model answered that no query is needed.
pub fn is_no_query(sql: &str) -> bool {
    strip_prefix_ignore_case(sql, NO_QUERY_MARKER).is_some()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| s.get(prefix.len()..))
}

fn is_empty_result(rows: &Value) -> bool {
    rows.as_array().map_or(true, Vec::is_empty)
}

#[async_trait]
impl Agent for QueryAgent {
    fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    async fn run(
        &self,
        task: &Task,
        inputs: &Snapshot,
        cancel: &CancellationSignal,
    ) -> Result<TaskOutput, AgentError> {
        if let Some(key) = task
            .output_keys
            .iter()
            .find(|k| **k != self.rows_output && **k != self.sql_output)
        {
            return Err(AgentError::Validation(format!(
                "query agent cannot produce `{key}`"
            )));
        }

        let raw = inputs.get_str(&self.sql_input).ok_or_else(|| {
            AgentError::Validation(format!("input `{}` is missing or not text", self.sql_input))
        })?;
        let mut sql = clean_sql(raw);
        if is_no_query(&sql) {
            info!(task = %task.id, "Model asked for no query");
            return Ok(self.output(task, Value::Array(Vec::new()), String::new()));
        }
        info!(task = %task.id, sql = %sql, "Executing generated query");

        let rows = match self.execute(&sql, cancel).await {
            Ok(rows) if !is_empty_result(&rows) => rows,
            Err(e) if e.retryable => {
                return Err(AgentError::transient(format!("matter query failed: {e}")))
            }
            outcome => {
                match outcome {
                    Ok(_) => warn!(task = %task.id, "No results, trying fallback query"),
                    Err(e) => warn!(task = %task.id, error = %e, "Query failed, trying fallback query"),
                }
                sql = FALLBACK_QUERY.to_string();
                self.execute(&sql, cancel).await.map_err(|e| {
                    if e.retryable {
                        AgentError::transient(format!("fallback query failed: {e}"))
                    } else {
                        AgentError::Fatal(format!("matter database unusable: {e}"))
                    }
                })?
            }
        };

        info!(
            task = %task.id,
            rows = rows.as_array().map_or(0, Vec::len),
            "Query complete"
        );

        Ok(self.output(task, rows, sql))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::matter_db::MatterDatabase;
    use crate::matter_query::MatterQueryTool;
    use std::collections::BTreeMap;

    fn agent() -> QueryAgent {
        let db = Arc::new(MatterDatabase::with_sample_data().unwrap());
        QueryAgent::new(
            AgentSpec::new("sql_runner", "Query Runner", "Execute SQL."),
            Arc::new(MatterQueryTool::new(db)),
        )
    }

    fn task() -> Task {
        Task::new("run_query", "sql_runner")
            .reads(["sql_query"])
            .writes(["query_results", "executed_sql"])
    }

    fn inputs(sql: &str) -> Snapshot {
        Snapshot::new(BTreeMap::from([(
            ContextKey::from("sql_query"),
            Value::from(sql),
        )]))
    }

    #[test]
    fn test_clean_sql() {
        assert_eq!(clean_sql("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(clean_sql("SQL: SELECT 1"), "SELECT 1");
        assert_eq!(clean_sql("  Query:SELECT 1 "), "SELECT 1");
        assert_eq!(clean_sql("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_clean_sql_ignores_case() {
        assert_eq!(clean_sql("```SQL\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(clean_sql("```Sql SELECT 1```"), "SELECT 1");
        assert_eq!(clean_sql("sql: SELECT 1"), "SELECT 1");
        assert_eq!(clean_sql("QUERY: SELECT 1"), "SELECT 1");
        assert_eq!(clean_sql("```\nselect Status from matters\n```"), "select Status from matters");
    }

    #[tokio::test]
    async fn test_no_query_reply_runs_nothing() {
        let out = agent()
            .run(&task(), &inputs("```\nNO_QUERY_NEEDED\n```"), &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(out[&ContextKey::from("query_results")], serde_json::json!([]));
        assert_eq!(out[&ContextKey::from("executed_sql")], "");
        assert!(is_no_query("no_query_needed"));
        assert!(!is_no_query("SELECT 'NO_QUERY'"));
    }

    #[tokio::test]
    async fn test_generated_query_is_used() {
        let out = agent()
            .run(
                &task(),
                &inputs("```sql\nSELECT COUNT(*) AS n FROM matters WHERE Case_Stage = 'Pre-Lit Settlement'\n```"),
                &CancellationSignal::new(),
            )
            .await
            .unwrap();
        assert_eq!(out[&ContextKey::from("query_results")], serde_json::json!([{"n": 3}]));
        assert!(out[&ContextKey::from("executed_sql")]
            .as_str()
            .unwrap()
            .starts_with("SELECT COUNT(*) AS n"));
    }

    #[tokio::test]
    async fn test_fallback_on_invalid_sql() {
        let out = agent()
            .run(&task(), &inputs("SELEC nonsense"), &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(out[&ContextKey::from("executed_sql")], FALLBACK_QUERY);
        assert_eq!(out[&ContextKey::from("query_results")], serde_json::json!([{"total": 10}]));
    }

    #[tokio::test]
    async fn test_fallback_on_empty_result() {
        let out = agent()
            .run(
                &task(),
                &inputs("SELECT * FROM matters WHERE Status = 'Open'"),
                &CancellationSignal::new(),
            )
            .await
            .unwrap();
        assert_eq!(out[&ContextKey::from("executed_sql")], FALLBACK_QUERY);
    }

    #[tokio::test]
    async fn test_missing_input_is_validation_error() {
        let err = agent()
            .run(&task(), &Snapshot::default(), &CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_output_key_is_validation_error() {
        let task = Task::new("run_query", "sql_runner")
            .reads(["sql_query"])
            .writes(["answer"]);
        let err = agent()
            .run(&task, &inputs("SELECT 1"), &CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}
