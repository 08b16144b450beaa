use anyhow::Context;
use docket_agent::{AgentSpec, ModelConfig};
use docket_core::{ContextKey, DocketError, Task, Value};
use docket_orchestrator::{legal_research_pipeline, RunConfig};
use serde::Deserialize;
use std::path::Path;

/// Contents of `docket.toml`.
///
/// The run itself (`[orchestrator]`, `[[agents]]`, `[[tasks]]`, `[inputs]`)
/// sits at the top level next to the `[model]` section.
#[derive(Debug, Deserialize)]
pub struct DocketConfig {
    /// Backend for model-driven agents. Only `validate` works without one.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(flatten)]
    pub run: RunConfig,
}

impl DocketConfig {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self, DocketError> {
        toml::from_str(raw).map_err(|e| DocketError::Config(e.to_string()))
    }

    pub fn model(&self) -> Result<&ModelConfig, DocketError> {
        self.model.as_ref().ok_or_else(|| {
            DocketError::Config("a [model] section is required to run model-backed agents".into())
        })
    }

    /// Agents and tasks to run. A config that declares no tasks runs the
    /// legal research pipeline; its agents are used unless the config
    /// declares its own.
    pub fn pipeline(&self) -> (Vec<AgentSpec>, Vec<Task>) {
        if !self.run.tasks.is_empty() {
            return (self.run.agents.clone(), self.run.tasks.clone());
        }
        let profile = legal_research_pipeline();
        let agents = if self.run.agents.is_empty() {
            profile.agents
        } else {
            self.run.agents.clone()
        };
        (agents, profile.tasks)
    }
}

/// Parses a `key=value` command-line input. The value is taken as text.
pub fn parse_input(raw: &str) -> Result<(ContextKey, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((ContextKey::from(key), Value::from(value)))
}
