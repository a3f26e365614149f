use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use wkdesk_core::config::LlmConfig;
use wkdesk_core::domain::conversation::{Message, Role, ToolCall};

use crate::error::AgentError;
use crate::tools::ToolSpec;

const PROVIDER: &str = "azure-openai";
const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;

/// Chat model bound to a fixed set of tools.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str;

    /// Returns the next assistant message for `messages`. The reply either
    /// carries text or a list of tool calls.
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec])
        -> Result<Message, AgentError>;
}

/// Azure OpenAI chat completions over a single deployment.
pub struct AzureChatClient {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl AzureChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, AgentError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| AgentError::Configuration("llm.api_key is not set".to_string()))?;

        let mut builder = reqwest::Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let http = builder
            .build()
            .map_err(|source| AgentError::Transport { provider: PROVIDER, source })?;

        Ok(Self {
            http,
            url: config.chat_completions_url(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, body: &Value) -> Result<Message, AgentError> {
        let response = self
            .http
            .post(&self.url)
            .header("api-key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|source| AgentError::Transport { provider: PROVIDER, source })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Upstream {
                provider: PROVIDER,
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|source| AgentError::Transport { provider: PROVIDER, source })?;

        parsed.into_message()
    }
}

#[async_trait]
impl LlmClient for AzureChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, AgentError> {
        let body = build_request_body(&self.model, self.temperature, messages, tools);

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(message) => {
                    debug!(
                        event_name = "agent.llm.completed",
                        model = %self.model,
                        attempt,
                        tool_calls = message.tool_calls.len(),
                        "chat completion received"
                    );
                    return Ok(message);
                }
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay = backoff(attempt);
                    warn!(
                        event_name = "agent.llm.retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying chat completion"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

pub(crate) fn build_request_body(
    model: &str,
    temperature: f32,
    messages: &[Message],
    tools: &[ToolSpec],
) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": temperature,
        "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
    });

    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body["tool_choice"] = json!("auto");
    }

    body
}

fn wire_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut wire = json!({ "role": role, "content": message.content });

    if !message.tool_calls.is_empty() {
        // The API expects `arguments` as an encoded JSON string.
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                let arguments = match &call.arguments {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                };
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": arguments },
                })
            })
            .collect();
        if message.content.is_empty() {
            wire["content"] = Value::Null;
        }
    }

    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }

    wire
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl ChatCompletionResponse {
    fn into_message(self) -> Result<Message, AgentError> {
        let choice = self.choices.into_iter().next().ok_or_else(|| AgentError::Upstream {
            provider: PROVIDER,
            status: None,
            message: "response contained no choices".to_string(),
        })?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments)),
            })
            .collect();

        Ok(if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tool_calls(content, tool_calls)
        })
    }
}
