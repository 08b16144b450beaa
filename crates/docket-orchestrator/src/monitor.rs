use docket_core::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::ErrorKind;

/// Metrics accumulated per agent across attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Attempts started.
    pub attempts: u32,
    /// Attempts that produced outputs.
    pub successes: u32,
    /// Attempts that failed, timeouts included.
    pub failures: u32,
    /// Backoffs before a further attempt.
    pub retries: u32,
    /// Attempts cut off by their timeout.
    pub timeouts: u32,
    /// Total time spent in attempts.
    pub duration_ms: u64,
}

/// What an agent is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// No attempt in flight.
    Idle,
    /// At least one attempt in flight.
    Working,
    /// Waiting out a retry backoff.
    BackingOff,
    /// The last attempt failed.
    Error,
}

/// Real-time snapshot of an agent's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent this state belongs to.
    pub agent_id: AgentId,
    /// Current activity.
    pub status: WorkerStatus,
    /// Attempts currently executing.
    pub in_flight: u32,
    /// Totals since the agent was registered.
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            status: WorkerStatus::Idle,
            in_flight: 0,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks state and metrics for every agent taking part in runs.
#[derive(Default)]
pub struct AgentMonitor {
    states: Arc<RwLock<BTreeMap<AgentId, AgentState>>>,
}

impl AgentMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `agent` in the idle state. No-op if already tracked.
    pub async fn register(&self, agent: &AgentId) {
        let mut states = self.states.write().await;
        states
            .entry(agent.clone())
            .or_insert_with(|| AgentState::new(agent.clone()));
    }

    /// Counts an attempt and marks the agent working.
    pub async fn attempt_started(&self, agent: &AgentId) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent.clone())
            .or_insert_with(|| AgentState::new(agent.clone()));
        state.in_flight += 1;
        state.metrics.attempts += 1;
        state.status = WorkerStatus::Working;
    }

    /// Close an attempt. `failure` is `None` on success.
    pub async fn attempt_finished(
        &self,
        agent: &AgentId,
        duration_ms: u64,
        failure: Option<ErrorKind>,
    ) {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(agent) else {
            return;
        };
        state.in_flight = state.in_flight.saturating_sub(1);
        state.metrics.duration_ms += duration_ms;
        match failure {
            None => state.metrics.successes += 1,
            Some(kind) => {
                state.metrics.failures += 1;
                if kind == ErrorKind::Timeout {
                    state.metrics.timeouts += 1;
                }
            }
        }
        state.status = match (state.in_flight, failure) {
            (0, None) => WorkerStatus::Idle,
            (0, Some(_)) => WorkerStatus::Error,
            _ => WorkerStatus::Working,
        };
    }

    /// A retry has been scheduled for one of the agent's tasks.
    pub async fn backing_off(&self, agent: &AgentId) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent) {
            state.metrics.retries += 1;
            if state.in_flight == 0 {
                state.status = WorkerStatus::BackingOff;
            }
        }
    }

    /// All agent states, ordered by id.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        states.values().cloned().collect()
    }

    /// State of one agent, if it has been registered.
    pub async fn get_state(&self, agent: &AgentId) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent).cloned()
    }

    /// Metrics summed over every agent.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.attempts += state.metrics.attempts;
            total.successes += state.metrics.successes;
            total.failures += state.metrics.failures;
            total.retries += state.metrics.retries;
            total.timeouts += state.metrics.timeouts;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Every agent state as a JSON object keyed by agent id.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn drafter() -> AgentId {
        AgentId::from("drafter")
    }

    #[tokio::test]
    async fn test_register_is_idle() {
        let monitor = AgentMonitor::new();
        monitor.register(&drafter()).await;
        let state = monitor.get_state(&drafter()).await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.in_flight, 0);
    }

    #[tokio::test]
    async fn test_attempt_lifecycle() {
        let monitor = AgentMonitor::new();
        monitor.attempt_started(&drafter()).await;
        monitor.attempt_started(&drafter()).await;
        let state = monitor.get_state(&drafter()).await.unwrap();
        assert_eq!(state.in_flight, 2);
        assert_eq!(state.status, WorkerStatus::Working);

        monitor
            .attempt_finished(&drafter(), 40, Some(ErrorKind::Timeout))
            .await;
        assert_eq!(
            monitor.get_state(&drafter()).await.unwrap().status,
            WorkerStatus::Working
        );

        monitor.attempt_finished(&drafter(), 60, None).await;
        let state = monitor.get_state(&drafter()).await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.metrics.attempts, 2);
        assert_eq!(state.metrics.successes, 1);
        assert_eq!(state.metrics.failures, 1);
        assert_eq!(state.metrics.timeouts, 1);
        assert_eq!(state.metrics.duration_ms, 100);
    }

    #[tokio::test]
    async fn test_failure_then_backoff() {
        let monitor = AgentMonitor::new();
        monitor.attempt_started(&drafter()).await;
        monitor
            .attempt_finished(&drafter(), 5, Some(ErrorKind::Transient))
            .await;
        assert_eq!(
            monitor.get_state(&drafter()).await.unwrap().status,
            WorkerStatus::Error
        );
        monitor.backing_off(&drafter()).await;
        let state = monitor.get_state(&drafter()).await.unwrap();
        assert_eq!(state.status, WorkerStatus::BackingOff);
        assert_eq!(state.metrics.retries, 1);
    }

    #[tokio::test]
    async fn test_aggregate_and_json() {
        let monitor = AgentMonitor::new();
        let reviewer = AgentId::from("reviewer");
        monitor.attempt_started(&drafter()).await;
        monitor.attempt_finished(&drafter(), 10, None).await;
        monitor.attempt_started(&reviewer).await;
        monitor
            .attempt_finished(&reviewer, 20, Some(ErrorKind::Validation))
            .await;

        let total = monitor.aggregate_metrics().await;
        assert_eq!(total.attempts, 2);
        assert_eq!(total.failures, 1);
        assert_eq!(total.duration_ms, 30);

        let json = monitor.to_json().await;
        assert_eq!(json["agents"].as_array().unwrap().len(), 2);
        assert_eq!(json["agents"][0]["agent_id"], "drafter");
        assert_eq!(json["aggregate"]["successes"], 1);
    }
}
