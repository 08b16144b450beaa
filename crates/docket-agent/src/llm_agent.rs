use crate::agent::{Agent, AgentSpec};
use crate::backends::{CompletionRequest, ModelBackend};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use docket_core::{
    AgentError, CancellationSignal, Message, Snapshot, Task, TaskOutput, ToolCall, ToolResult,
    Value,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An agent backed by a language model.
///
/// Prompt → model → tool call → execute → backfill → repeat, up to
/// `max_turns` round-trips. The final text is parsed into the task's
/// declared output keys.
pub struct LlmAgent {
    spec: AgentSpec,
    backend: Arc<dyn ModelBackend>,
    tools: Arc<ToolRegistry>,
}

impl LlmAgent {
    /// Agent driven by `backend`, able to call the allowed tools in `tools`.
    pub fn new(spec: AgentSpec, backend: Arc<dyn ModelBackend>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            spec,
            backend,
            tools,
        }
    }

    fn build_prompt(&self, task: &Task, inputs: &Snapshot) -> String {
        let mut prompt = String::new();
        if !task.description.is_empty() {
            prompt.push_str(task.description.trim());
            prompt.push_str("\n\n");
        }

        for key in &task.input_keys {
            prompt.push_str(&format!("## {key}\n"));
            match inputs.get(key) {
                Some(Value::String(s)) => prompt.push_str(s),
                Some(other) => prompt.push_str(&other.to_string()),
                None => prompt.push_str("(not provided)"),
            }
            prompt.push_str("\n\n");
        }

        match task.output_keys.as_slice() {
            [] => {}
            [_] => prompt.push_str("Respond with the result only, without preamble."),
            keys => {
                let names: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
                prompt.push_str(&format!(
                    "Respond with a single JSON object with exactly these keys: {}.",
                    names.join(", ")
                ));
            }
        }
        prompt
    }

    /// Execute one tool call, turning anything that is not the model's
    /// concern into an `AgentError`.
    async fn call_tool(
        &self,
        call: &ToolCall,
        cancel: &CancellationSignal,
    ) -> Result<ToolResult, AgentError> {
        if !self.spec.allowed_tools.contains(&call.name) {
            warn!(agent = %self.spec.id, tool = %call.name, "Tool not allowed for agent");
            return Ok(ToolResult::error(
                &call.id,
                format!("tool `{}` is not available to this agent", call.name),
            ));
        }

        match self.tools.invoke(call, cancel).await {
            Ok(result) => Ok(result),
            Err(e) if e.retryable => Err(AgentError::transient(format!(
                "tool `{}` failed: {}",
                call.name, e.message
            ))),
            Err(e) => {
                debug!(tool = %call.name, error = %e.message, "Feeding tool error back to model");
                Ok(ToolResult::error(&call.id, e.message))
            }
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    async fn run(
        &self,
        task: &Task,
        inputs: &Snapshot,
        cancel: &CancellationSignal,
    ) -> Result<TaskOutput, AgentError> {
        let mut request = CompletionRequest {
            system: Some(self.spec.system_instruction.clone()),
            messages: vec![Message::user(self.build_prompt(task, inputs))],
            tools: self.tools.descriptors_for(&self.spec.allowed_tools),
        };

        for turn in 0..self.spec.max_turns {
            if cancel.is_cancelled() {
                return Err(AgentError::transient("cancelled"));
            }
            debug!(agent = %self.spec.id, task = %task.id, turn, "Model turn");

            let result = self.backend.complete(&request, cancel).await?;

            let Some(call) = result.tool_call else {
                info!(agent = %self.spec.id, task = %task.id, turns = turn + 1, "Model answered");
                return parse_output(task, &result.text);
            };

            if !result.text.is_empty() {
                request.messages.push(Message::assistant(&result.text));
            }
            info!(agent = %self.spec.id, tool = %call.name, call_id = %call.id, "Executing tool call");
            let tool_result = self.call_tool(&call, cancel).await?;
            let backfill = serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_result.call_id,
                "content": tool_result.content,
                "is_error": tool_result.is_error,
            });
            request.messages.push(Message::tool(backfill.to_string()));
        }

        warn!(agent = %self.spec.id, task = %task.id, max_turns = self.spec.max_turns, "Tool loop reached max turns");
        Err(AgentError::Transient {
            message: format!("exceeded {} model turns", self.spec.max_turns),
            reduced_budget: true,
        })
    }
}

/// Remove one fenced code block wrapper (```lang ... ```) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`, `sql`) on the opening line.
    match body.find('\n') {
        Some(idx) => body[idx + 1..].trim(),
        None => body.trim(),
    }
}

fn parse_output(task: &Task, text: &str) -> Result<TaskOutput, AgentError> {
    let body = strip_code_fence(text);
    if body.is_empty() && !task.output_keys.is_empty() {
        return Err(AgentError::Validation(format!(
            "model returned an empty answer for task `{}`",
            task.id
        )));
    }

    match task.output_keys.as_slice() {
        [] => Ok(TaskOutput::new()),
        [key] => Ok(TaskOutput::from([(key.clone(), Value::String(body.to_string()))])),
        keys => {
            let parsed: Value = serde_json::from_str(body).map_err(|e| {
                AgentError::Validation(format!("expected a JSON object of outputs: {e}"))
            })?;
            let Value::Object(mut fields) = parsed else {
                return Err(AgentError::Validation(
                    "expected a JSON object of outputs".to_string(),
                ));
            };
            keys.iter()
                .map(|key| {
                    fields
                        .remove(key.as_str())
                        .map(|v| (key.clone(), v))
                        .ok_or_else(|| {
                            AgentError::Validation(format!("answer is missing output `{key}`"))
                        })
                })
                .collect()
        }
    }
}
