use super::{CompletionRequest, CompletionResult, ModelBackend};
use crate::config::{LlmProvider, ModelConfig};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use docket_core::{BackendError, BackendErrorKind, CancellationSignal, Message, Role, ToolCall};
use reqwest::StatusCode;
use tracing::debug;

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Backend for the configured provider.
    pub fn new(config: ModelConfig) -> Self {
        let api_key = config.resolve_api_key().unwrap_or_default();
        Self {
            config,
            api_key,
            http: reqwest::Client::new(),
        }
    }

    fn build_messages(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = system_prompt {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in messages {
            let role = match m.role {
                Role::System => continue,
                // Tool output is backfilled as a user turn; the API would
                // otherwise require the originating tool_call_id.
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };
            api_messages.push(serde_json::json!({
                "role": role,
                "content": m.content
            }));
        }

        api_messages
    }

    fn build_tools(&self, tools: &[ToolDescriptor]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        // OpenRouter requires extra headers
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request.header("X-Title", "docket")
        } else {
            request
        }
    }

    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResult, BackendError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let api_messages = self.build_messages(request.system.as_deref(), &request.messages);

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": api_messages,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(self.build_tools(&request.tools));
        }

        debug!(url = %url, model = %self.config.model_id, "Sending completion request");

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(BackendError::new(
                classify_status(status),
                format!("OpenAI API error {status}: {text}"),
            ));
        }

        let resp_body: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            BackendError::new(BackendErrorKind::Unknown, format!("malformed response: {e}"))
        })?;

        parse_openai_response(&resp_body)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationSignal,
    ) -> Result<CompletionResult, BackendError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackendError::new(
                BackendErrorKind::Timeout,
                "request cancelled",
            )),
            result = self.send(request) => result,
        }
    }
}

/// Maps an HTTP status onto the backend failure taxonomy.
pub fn classify_status(status: StatusCode) -> BackendErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendErrorKind::Auth,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendErrorKind::Timeout,
        _ => BackendErrorKind::Unknown,
    }
}

fn classify_transport_error(err: reqwest::Error) -> BackendError {
    let kind = if err.is_timeout() {
        BackendErrorKind::Timeout
    } else {
        BackendErrorKind::Unknown
    };
    BackendError::new(kind, err.to_string())
}

/// Extracts the first choice of a chat completions response.
pub fn parse_openai_response(body: &serde_json::Value) -> Result<CompletionResult, BackendError> {
    let choice = body["choices"].get(0).ok_or_else(|| {
        BackendError::new(BackendErrorKind::Unknown, "response contained no choices")
    })?;
    let message = &choice["message"];
    let text = message["content"].as_str().unwrap_or_default().to_string();

    let tool_call = message["tool_calls"]
        .as_array()
        .and_then(|calls| calls.first())
        .and_then(|tc| {
            let id = tc["id"].as_str()?.to_string();
            let name = tc["function"]["name"].as_str()?.to_string();
            let arguments: serde_json::Value =
                serde_json::from_str(tc["function"]["arguments"].as_str()?).unwrap_or_default();
            Some(ToolCall {
                id,
                name,
                arguments,
            })
        });

    Ok(CompletionResult { text, tool_call })
}
