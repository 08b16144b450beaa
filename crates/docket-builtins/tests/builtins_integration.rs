//! Integration tests for docket-builtins: registry wiring and query flows.

use docket_agent::{Agent, AgentSpec, ToolRegistry};
use docket_builtins::{register_builtins, MatterDatabase, MatterQueryTool, QueryAgent, FALLBACK_QUERY};
use docket_core::{CancellationSignal, ContextKey, Snapshot, Task, ToolCall};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn db() -> Arc<MatterDatabase> {
    Arc::new(MatterDatabase::with_sample_data().unwrap())
}

// ---- 1. Registration ----

#[test]
fn test_register_builtins() {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, db());
    assert_eq!(registry.tool_count(), 1);

    let allowed: BTreeSet<String> = [MatterQueryTool::NAME.to_string()].into();
    let descriptors = registry.descriptors_for(&allowed);
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].parameters_schema["required"][0], "sql");
}

// ---- 2. Tool invocation through the registry ----

#[tokio::test]
async fn test_registry_invokes_matter_query() {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, db());
    let call = ToolCall {
        id: "call_7".into(),
        name: "matter_query".into(),
        arguments: serde_json::json!({
            "sql": "SELECT Attorney_Name, COUNT(*) AS cases FROM matters \
                    WHERE Attorney_Name != '' GROUP BY Attorney_Name \
                    ORDER BY cases DESC, Attorney_Name LIMIT 2"
        }),
    };
    let result = registry.invoke(&call, &CancellationSignal::new()).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.call_id, "call_7");
    assert_eq!(result.content[0]["Attorney_Name"], "Riley Lee");
    assert_eq!(result.content[0]["cases"], 2);
    assert_eq!(result.content[1]["Attorney_Name"], "Riley Wilson");
}

// ---- 3. Query agent with shared database ----

#[tokio::test]
async fn test_query_agents_share_database_concurrently() {
    let db = db();
    let agent = Arc::new(QueryAgent::new(
        AgentSpec::new("sql_runner", "Query Runner", "Execute SQL."),
        Arc::new(MatterQueryTool::new(Arc::clone(&db))),
    ));

    let mut handles = Vec::new();
    for sql in [
        "SELECT COUNT(*) AS n FROM matters",
        "DELETE FROM matters",
        "SELECT Id FROM matters WHERE Closed_Date LIKE '%/24'",
    ] {
        let agent = Arc::clone(&agent);
        handles.push(tokio::spawn(async move {
            let task = Task::new("run_query", "sql_runner")
                .reads(["sql_query"])
                .writes(["query_results", "executed_sql"]);
            let inputs = Snapshot::new(BTreeMap::from([(
                ContextKey::from("sql_query"),
                serde_json::Value::from(sql),
            )]));
            agent.run(&task, &inputs, &CancellationSignal::new()).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    let executed = ContextKey::from("executed_sql");
    assert_eq!(results[0][&executed], "SELECT COUNT(*) AS n FROM matters");
    // The write is refused and the fallback runs instead.
    assert_eq!(results[1][&executed], FALLBACK_QUERY);
    let closed_2024 = results[2][&ContextKey::from("query_results")].as_array().unwrap();
    assert_eq!(closed_2024.len(), 4);
    assert_eq!(db.count().unwrap(), 10);
}
