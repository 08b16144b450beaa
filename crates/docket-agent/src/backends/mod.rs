/// OpenAI-compatible chat completions backend.
pub mod openai;

use docket_core::{BackendError, CancellationSignal, Message, ToolCall};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;

/// A single completion request: instruction, transcript and offered tools.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System instruction.
    pub system: Option<String>,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolDescriptor>,
}

/// What the model answered: text, optionally with a tool call request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResult {
    /// Answer text. May be empty when a tool call is requested.
    pub text: String,
    /// Requested tool call, if any.
    pub tool_call: Option<ToolCall>,
}

impl CompletionResult {
    /// A plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_call: None,
        }
    }

    /// A tool call request with no accompanying text.
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            text: String::new(),
            tool_call: Some(call),
        }
    }
}

/// Trait for language-model completion backends.
///
/// The engine treats the model as an opaque `complete(prompt, tools)` function.
/// Implementations must honour `cancel`: either race the request against
/// [`CancellationSignal::cancelled`] or check it before starting work.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `ModelBackend` for your struct
/// 3. Map provider failures onto [`docket_core::BackendErrorKind`]
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationSignal,
    ) -> Result<CompletionResult, BackendError>;
}
