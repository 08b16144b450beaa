#![allow(clippy::unwrap_used, clippy::expect_used)]

use docket_core::*;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// 1. Task definitions round-trip through configuration formats
// ---------------------------------------------------------------------------

#[test]
fn task_definition_roundtrip() {
    let task = Task::new("review", "reviewer")
        .with_description("Review the draft for citation errors")
        .reads(["draft_document"])
        .writes(["review_notes"])
        .after(["draft"]);

    let json = serde_json::to_string(&task).unwrap();
    let parsed: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, task);
    assert!(json.contains("\"depends_on\":[\"draft\"]"));
}

// ---------------------------------------------------------------------------
// 2. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let missing = ContextError::MissingKey(ContextKey::from("research_notes"));
    assert_eq!(
        missing.to_string(),
        "context key `research_notes` has not been written"
    );

    let dup = ContextError::DuplicateKey {
        key: ContextKey::from("draft_document"),
        producer: "task `draft`".into(),
    };
    assert_eq!(
        dup.to_string(),
        "context key `draft_document` was already written by task `draft`"
    );

    let err: DocketError = dup.into();
    assert!(matches!(err, DocketError::Context(_)));

    let unproduced = GraphError::UnproducedInput {
        task: TaskId::from("review"),
        key: ContextKey::from("citations"),
    };
    assert_eq!(
        unproduced.to_string(),
        "task `review` reads `citations`, which no transitive dependency produces"
    );

    let err: DocketError = unproduced.into();
    assert!(err.to_string().starts_with("Graph error:"));
}

// ---------------------------------------------------------------------------
// 3. Backend and tool failures classify into the agent taxonomy
// ---------------------------------------------------------------------------

#[test]
fn backend_errors_classify_into_agent_errors() {
    let cases = [
        (BackendErrorKind::RateLimited, true, false),
        (BackendErrorKind::Timeout, true, false),
        (BackendErrorKind::Unknown, true, true),
        (BackendErrorKind::Auth, false, false),
    ];
    for (kind, retryable, reduced) in cases {
        let err = AgentError::from(BackendError::new(kind, "provider said no"));
        assert_eq!(err.is_retryable(), retryable, "{kind:?}");
        if let AgentError::Transient { reduced_budget, .. } = err {
            assert_eq!(reduced_budget, reduced, "{kind:?}");
        }
    }
}

#[test]
fn tool_error_constructors() {
    assert!(ToolError::retryable("database busy").retryable);
    assert!(!ToolError::permanent("syntax error").retryable);
}

// ---------------------------------------------------------------------------
// 4. Snapshots expose only what they were built with
// ---------------------------------------------------------------------------

#[test]
fn snapshot_is_a_read_only_view() {
    let mut entries = BTreeMap::new();
    entries.insert(ContextKey::from("b"), serde_json::json!({"rows": 2}));
    entries.insert(ContextKey::from("a"), Value::from("first"));
    let snapshot = Snapshot::new(entries);

    let keys: Vec<&str> = snapshot.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(snapshot.get(&"b".into()).unwrap()["rows"], 2);
    assert!(snapshot.get(&"c".into()).is_none());
    assert!(Snapshot::default().is_empty());
}
