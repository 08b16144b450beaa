use serde::{Deserialize, Serialize};

/// Providers reachable through the OpenAI-compatible chat completions API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    OpenRouter,
    /// Groq cloud inference, free tier with rate limits.
    Groq,
}

impl LlmProvider {
    /// Environment variable consulted when the config carries no key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Groq => "GROQ_API_KEY",
        }
    }
}

/// The `[model]` section: which provider and model to call, and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider to call.
    pub provider: LlmProvider,
    /// Model name as the provider knows it.
    pub model_id: String,
    /// Falls back to the provider's environment variable when empty.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

impl ModelConfig {
    /// Endpoint to call: the override or the provider default.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
            }
        }
    }

    /// The configured key, or the provider's environment variable when blank.
    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var(self.provider.api_key_env())
            .ok()
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_and_override() {
        let mut config = ModelConfig {
            provider: LlmProvider::Groq,
            model_id: "llama-3.1-8b-instant".into(),
            api_key: "k".into(),
            api_base_url: None,
            temperature: 0.0,
            max_tokens: 16,
        };
        assert_eq!(config.base_url(), "https://api.groq.com/openai");
        config.api_base_url = Some("http://127.0.0.1:9000".into());
        assert_eq!(config.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = ModelConfig {
            provider: LlmProvider::OpenAi,
            model_id: "gpt-4o-mini".into(),
            api_key: "sk-config".into(),
            api_base_url: None,
            temperature: 0.2,
            max_tokens: 16,
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-config"));
    }
}
