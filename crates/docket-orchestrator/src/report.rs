use crate::context::ContextStore;
use crate::graph::TaskGraph;
use crate::types::{AbortReason, RunStatus, TaskStatus};
use docket_core::{ContextKey, TaskId, TaskOutput, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final deliverable of a run.
///
/// Every map is ordered, so two reports built from the same inputs serialize
/// to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Overall outcome.
    pub status: RunStatus,
    /// Outputs of succeeded tasks only.
    pub task_outputs: BTreeMap<TaskId, TaskOutput>,
    /// Final status of every task, including failure and skip reasons.
    pub tasks: BTreeMap<TaskId, TaskStatus>,
    /// Outputs of succeeded tasks that nothing depends on.
    pub terminal_outputs: BTreeMap<ContextKey, Value>,
    /// Set when the run was aborted.
    pub abort_reason: Option<String>,
    /// One-line human-readable summary.
    pub summary: String,
}

impl Report {
    /// Number of tasks that succeeded.
    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::is_succeeded)
    }

    /// Number of tasks that failed.
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Failed { .. }))
    }

    /// Number of tasks that were skipped.
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.tasks.values().filter(|s| pred(*s)).count()
    }
}

/// Build the report for a finished run. Pure: no clock, no randomness.
///
/// Tasks missing from `statuses` are reported as `Pending`.
pub fn aggregate(
    graph: &TaskGraph,
    store: &ContextStore,
    statuses: &BTreeMap<TaskId, TaskStatus>,
    abort: Option<&AbortReason>,
) -> Report {
    let tasks: BTreeMap<TaskId, TaskStatus> = graph
        .tasks()
        .map(|t| {
            let status = statuses.get(&t.id).cloned().unwrap_or(TaskStatus::Pending);
            (t.id.clone(), status)
        })
        .collect();

    let outputs_of = |id: &TaskId| -> TaskOutput {
        graph
            .get(id)
            .map(|task| {
                task.output_keys
                    .iter()
                    .filter_map(|k| store.value(k).map(|v| (k.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    };

    let task_outputs: BTreeMap<TaskId, TaskOutput> = tasks
        .iter()
        .filter(|(_, status)| status.is_succeeded())
        .map(|(id, _)| (id.clone(), outputs_of(id)))
        .collect();

    let terminal_outputs: BTreeMap<ContextKey, Value> = graph
        .terminal_tasks()
        .into_iter()
        .filter_map(|id| task_outputs.get(id))
        .flat_map(|out| out.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect();

    let succeeded = task_outputs.len();
    let failed = tasks
        .values()
        .filter(|s| matches!(s, TaskStatus::Failed { .. }))
        .count();
    let skipped = tasks
        .values()
        .filter(|s| matches!(s, TaskStatus::Skipped { .. }))
        .count();

    let status = if abort.is_some() {
        RunStatus::Aborted
    } else if succeeded == tasks.len() {
        RunStatus::Completed
    } else if succeeded == 0 {
        RunStatus::Failed
    } else {
        RunStatus::PartiallyFailed
    };

    let mut summary = format!(
        "{status}: {succeeded}/{} tasks succeeded, {failed} failed, {skipped} skipped",
        tasks.len()
    );
    if let Some(reason) = abort {
        summary.push_str(&format!(" ({reason})"));
    }

    Report {
        status,
        task_outputs,
        tasks,
        terminal_outputs,
        abort_reason: abort.map(ToString::to_string),
        summary,
    }
}
