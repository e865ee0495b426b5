//! LLM gateway abstraction for tool selection and text completion
//!
//! The gateway is a capability: any backend that can present a set of
//! callable tools to a model and hand back a structured tool-call result
//! satisfies [`LlmGateway`]. The engine never talks to a provider directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod openai;

pub use openai::{OpenAiConfig, OpenAiGateway};

/// Errors surfaced by gateway backends
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (connection, timeout, TLS)
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from the provider
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response did not match the expected protocol shape
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for gateway operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A callable function presented to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Function name, unique within one request
    pub name: String,
    /// Natural-language description shown to the model
    pub description: String,
    /// JSON schema of the function parameters, passed through opaquely
    pub parameters: serde_json::Value,
}

/// Outcome of a tool-selection call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSelection {
    /// Name of the first tool the model chose, if any
    pub tool_name: Option<String>,
    /// Arguments the model supplied for that call, if they parsed
    pub arguments: Option<serde_json::Value>,
}

impl ToolSelection {
    /// Plain-text response, no tool call
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether the model chose a tool at all
    pub fn is_tool_call(&self) -> bool {
        self.tool_name.is_some()
    }
}

/// Uniform adapter over chat+tools and plain-text LLM calls.
///
/// Tool execution is neutered by contract: implementations present tools and
/// report what the model selected, but never dispatch the returned call.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Present `tools` to the model with `query` as a single user turn and
    /// return the first tool it chose (or none for a plain-text reply).
    /// Uses deterministic decoding.
    async fn tool_selection(
        &self,
        model: &str,
        query: &str,
        tools: &[ToolFunction],
    ) -> ProviderResult<ToolSelection>;

    /// One-shot prompt returning the assistant text.
    async fn text_completion(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> ProviderResult<String>;
}
