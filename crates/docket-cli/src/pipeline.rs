use docket_agent::{
    AgentRegistry, AgentSpec, LlmAgent, ModelBackend, ModelConfig, OpenAiBackend, ToolRegistry,
};
use docket_builtins::{register_builtins, MatterDatabase, MatterQueryTool, QueryAgent};
use docket_orchestrator::SQL_RUNNER_AGENT;
use std::sync::Arc;
use tracing::info;

/// Builds one agent per spec.
///
/// Every agent is model-backed and shares the built-in tools, except the
/// SQL runner of the matter pipelines, which executes queries itself.
pub fn build_agents(
    specs: Vec<AgentSpec>,
    model: &ModelConfig,
    db: Arc<MatterDatabase>,
) -> AgentRegistry {
    let backend: Arc<dyn ModelBackend> = Arc::new(OpenAiBackend::new(model.clone()));
    let mut tools = ToolRegistry::new();
    register_builtins(&mut tools, Arc::clone(&db));
    let tools = Arc::new(tools);

    let mut registry = AgentRegistry::new();
    for spec in specs {
        if spec.id.as_str() == SQL_RUNNER_AGENT {
            let tool = Arc::new(MatterQueryTool::new(Arc::clone(&db)));
            registry.register(Arc::new(QueryAgent::new(spec, tool)));
        } else {
            registry.register(Arc::new(LlmAgent::new(
                spec,
                Arc::clone(&backend),
                Arc::clone(&tools),
            )));
        }
    }
    info!(
        agents = registry.len(),
        tools = tools.tool_count(),
        model = %model.model_id,
        "Agents ready"
    );
    registry
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use docket_agent::{Agent, LlmProvider};
    use docket_orchestrator::{matter_chat_pipeline, matter_query_pipeline};

    fn model() -> ModelConfig {
        ModelConfig {
            provider: LlmProvider::OpenAi,
            model_id: "gpt-4o-mini".into(),
            api_key: "sk-test".into(),
            api_base_url: None,
            temperature: 0.2,
            max_tokens: 512,
        }
    }

    #[test]
    fn test_build_matter_pipeline_agents() {
        let db = Arc::new(MatterDatabase::with_sample_data().unwrap());
        let registry = build_agents(matter_query_pipeline().agents, &model(), db);

        assert_eq!(registry.len(), 3);
        let runner = registry.get(&SQL_RUNNER_AGENT.into()).unwrap();
        assert_eq!(runner.spec().role_name, "SQL Runner");
        assert!(registry.contains(&"data_analyst".into()));
    }

    #[test]
    fn test_build_chat_pipeline_agents() {
        let db = Arc::new(MatterDatabase::with_sample_data().unwrap());
        let registry = build_agents(matter_chat_pipeline().agents, &model(), db);

        assert_eq!(registry.len(), 3);
        let runner = registry.get(&SQL_RUNNER_AGENT.into()).unwrap();
        assert_eq!(runner.spec().role_name, "SQL Runner");
        let assistant = registry.get(&"chat_assistant".into()).unwrap();
        assert_eq!(assistant.spec().role_name, "Legal Database Chat Assistant");
    }
}
