//! Agent contract, tool adapters and model backends.
//!
//! An [`Agent`] turns a task plus an immutable input snapshot into one value
//! per declared output key. [`LlmAgent`] does this by driving a
//! [`ModelBackend`] through a bounded tool-use loop.

/// Agent contract, specs and registry.
pub mod agent;
/// Model backends.
pub mod backends;
/// Model provider configuration.
pub mod config;
/// Model-backed agent with a tool-use loop.
pub mod llm_agent;
/// Tool adapters and their registry.
pub mod tools;

pub use agent::{Agent, AgentRegistry, AgentSpec};
pub use backends::openai::OpenAiBackend;
pub use backends::{CompletionRequest, CompletionResult, ModelBackend};
pub use config::{LlmProvider, ModelConfig};
pub use llm_agent::{strip_code_fence, LlmAgent};
pub use tools::{ToolAdapter, ToolDescriptor, ToolRegistry};
