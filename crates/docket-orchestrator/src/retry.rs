use docket_agent::AgentSpec;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry, backoff and timeout policy applied by the orchestrator around each
/// task dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the exponential part of the delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random delay added on top.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Per-attempt timeout.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_task_timeout_ms() -> u64 {
    120_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            task_timeout_ms: default_task_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// `base × 2^retry`, capped at `max_delay_ms`. `retry` is 0 for the first retry.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry));
        delay.min(self.max_delay_ms)
    }

    /// Backoff plus a uniformly random jitter in `0..=jitter_ms`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::rng().random_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.backoff_ms(retry).saturating_add(jitter))
    }

    /// Retry limits and timeout for tasks run by `agent`, with the agent's
    /// own overrides applied.
    pub fn budget_for(&self, agent: &AgentSpec) -> TaskBudget {
        let max_retries = agent.max_retries.unwrap_or(self.max_retries);
        TaskBudget {
            max_retries,
            reduced_retries: max_retries / 2,
            timeout: Duration::from_millis(agent.timeout_ms.unwrap_or(self.task_timeout_ms)),
        }
    }
}

/// Effective limits for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskBudget {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Limit applied to failures flagged with a reduced budget
    /// (unclassified backend errors, tool-loop exhaustion).
    pub reduced_retries: u32,
    /// Limit on each attempt.
    pub timeout: Duration,
}

impl TaskBudget {
    /// Whether a transient failure of 1-based `attempt` may be retried.
    pub fn allows_retry(&self, attempt: u32, reduced: bool) -> bool {
        let limit = if reduced {
            self.reduced_retries
        } else {
            self.max_retries
        };
        attempt <= limit
    }
}
