use async_trait::async_trait;
use docket_core::{AgentError, AgentId, CancellationSignal, Snapshot, Task, TaskOutput};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// Static definition of a named agent role.
///
/// Immutable after construction. `max_retries` and `timeout_ms` override the
/// orchestrator's retry policy for tasks assigned to this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique id tasks refer to.
    pub id: AgentId,
    /// Display name, e.g. "Legal Researcher".
    pub role_name: String,
    /// System prompt for model-backed agents.
    pub system_instruction: String,
    /// Tools the agent may call. Empty means none.
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    /// Overrides the policy's retry count.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Overrides the policy's per-attempt timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Upper bound on model round-trips (tool calls included) per attempt.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

fn default_max_turns() -> u32 {
    8
}

impl AgentSpec {
    /// Spec with no tools and the policy defaults.
    pub fn new(
        id: impl Into<AgentId>,
        role_name: impl Into<String>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role_name: role_name.into(),
            system_instruction: system_instruction.into(),
            allowed_tools: BTreeSet::new(),
            max_retries: None,
            timeout_ms: None,
            max_turns: default_max_turns(),
        }
    }

    /// Replaces the allowed tool set.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the retry override.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the timeout override.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A worker that executes tasks.
///
/// Agents are stateless across invocations: the same instance may run
/// several tasks concurrently. Everything an invocation may read arrives in
/// the immutable `inputs` snapshot; results go back to the orchestrator,
/// which alone writes the context store.
#[async_trait]
pub trait Agent: Send + Sync {
    fn spec(&self) -> &AgentSpec;

    /// Produce one value per declared output key of `task`.
    async fn run(
        &self,
        task: &Task,
        inputs: &Snapshot,
        cancel: &CancellationSignal,
    ) -> Result<TaskOutput, AgentError>;
}

/// The closed set of agents available to a run, registered at startup.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an agent, replacing any with the same id.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let id = agent.spec().id.clone();
        info!(agent = %id, role = %agent.spec().role_name, "Registered agent");
        self.agents.insert(id, agent);
    }

    /// Builder form of [`AgentRegistry::register`].
    pub fn with(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// Agent with the given id.
    pub fn get(&self, id: &AgentId) -> Option<&Arc<dyn Agent>> {
        self.agents.get(id)
    }

    /// Whether an agent with this id is registered.
    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&AgentId> {
        let mut ids: Vec<&AgentId> = self.agents.keys().collect();
        ids.sort();
        ids
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True when no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
