//! OpenAI-compatible chat-completions backend

use crate::{LlmGateway, ProviderError, ProviderResult, ToolFunction, ToolSelection};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Gateway configuration for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL up to and including the API root (no trailing slash)
    pub base_url: String,
    /// Bearer token; empty for unauthenticated local endpoints
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool<'a>>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'a str,
    function: ChatFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ChatFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: CalledFunction,
}

#[derive(Debug, Deserialize)]
struct CalledFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Gateway over any chat-completions API that supports function tools.
///
/// Tool calls returned by the model are reported, never dispatched; the
/// client has no execution path.
pub struct OpenAiGateway {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiGateway {
    /// Create a new gateway
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> ProviderResult<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!(
            model = request.model,
            tools = request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending chat completion request"
        );

        let mut builder = self.client.post(&url).json(request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn tool_selection(
        &self,
        model: &str,
        query: &str,
        tools: &[ToolFunction],
    ) -> ProviderResult<ToolSelection> {
        let chat_tools: Vec<ChatTool<'_>> = tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function",
                function: ChatFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: query,
            }],
            tools: Some(chat_tools),
            temperature: 0.0,
            max_tokens: None,
        };

        let response = self.chat(&request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Protocol("no choices in response".to_string()))?;

        let Some(call) = choice
            .message
            .tool_calls
            .and_then(|calls| calls.into_iter().next())
        else {
            return Ok(ToolSelection::none());
        };

        // Argument strings the model failed to format as JSON are dropped,
        // not fatal; only the selected name matters to callers.
        let arguments = match serde_json::from_str(&call.function.arguments) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    tool = %call.function.name,
                    error = %e,
                    "tool call arguments were not valid JSON"
                );
                None
            }
        };

        Ok(ToolSelection {
            tool_name: Some(call.function.name),
            arguments,
        })
    }

    async fn text_completion(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> ProviderResult<String> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            tools: None,
            temperature: 0.0,
            max_tokens: Some(max_output_tokens),
        };

        let response = self.chat(&request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Protocol("no content in response".to_string()))
    }
}
