use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use wkdesk_agent::{AgentError, AgentRuntime, GraphSettings, LlmClient, Tool, ToolRegistry, ToolSpec};
use wkdesk_core::domain::conversation::{Message, Role, ToolCall};
use wkdesk_db::InMemoryCheckpointStore;

/// Model stand-in. With `search_first` set it requests one search whenever
/// the latest message is from the user, then answers from the tool result.
pub struct CannedLlm {
    answer: String,
    search_first: bool,
}

impl CannedLlm {
    pub fn answering(answer: &str) -> Self {
        Self { answer: answer.to_string(), search_first: false }
    }

    pub fn searching(answer: &str) -> Self {
        Self { answer: answer.to_string(), search_first: true }
    }
}

#[async_trait]
impl LlmClient for CannedLlm {
    fn model(&self) -> &str {
        "canned"
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, AgentError> {
        let last = messages.last().map(|message| message.role);
        if self.search_first && last == Some(Role::User) && !tools.is_empty() {
            return Ok(Message::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "call_1".to_string(),
                    name: tools[0].name.clone(),
                    arguments: json!({ "query": messages[messages.len() - 1].content }),
                }],
            ));
        }
        match last {
            Some(Role::Tool) => Ok(Message::assistant(format!(
                "{} ({})",
                self.answer,
                messages[messages.len() - 1].content
            ))),
            _ => Ok(Message::assistant(self.answer.clone())),
        }
    }
}

/// Search stand-in that counts its invocations.
#[derive(Default)]
pub struct CountingSearch {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Tool for CountingSearch {
    fn name(&self) -> &'static str {
        "tavily_search"
    }

    fn description(&self) -> &'static str {
        "counting search"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }

    async fn execute(&self, _input: Value) -> Result<Value, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!("Sunny, 21C"))
    }
}

pub fn agent_with(llm: CannedLlm) -> Arc<AgentRuntime> {
    agent_with_tools(llm, ToolRegistry::default())
}

pub fn agent_with_tools(llm: CannedLlm, tools: ToolRegistry) -> Arc<AgentRuntime> {
    Arc::new(AgentRuntime::new(
        Arc::new(llm),
        tools,
        Arc::new(InMemoryCheckpointStore::default()),
        GraphSettings::default(),
    ))
}
