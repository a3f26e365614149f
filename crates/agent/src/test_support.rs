use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use wkdesk_core::domain::conversation::{Message, ToolCall};

use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::tools::{Tool, ToolSpec};

/// Replays canned replies and records every request it saw.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<Message, AgentError>>>,
    pub requests: Mutex<Vec<(Vec<Message>, Vec<ToolSpec>)>>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::default(),
        }
    }

    pub fn push_error(&self, error: AgentError) {
        self.replies.lock().expect("replies lock").push_back(Err(error));
    }

    pub fn request(&self, index: usize) -> Vec<Message> {
        self.requests.lock().expect("requests lock")[index].0.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, AgentError> {
        self.requests.lock().expect("requests lock").push((messages.to_vec(), tools.to_vec()));
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Message::assistant("script exhausted")))
    }
}

pub fn search_call(id: &str, query: &str) -> Message {
    Message::assistant_with_tool_calls(
        "",
        vec![ToolCall {
            id: id.to_string(),
            name: "tavily_search".to_string(),
            arguments: json!({ "query": query }),
        }],
    )
}

/// Stand-in for the search tool that echoes its query. Fails every call when
/// `fail` is set, or only calls whose query equals `fail_query`.
#[derive(Default)]
pub struct EchoSearch {
    pub queries: Mutex<Vec<Value>>,
    pub fail: bool,
    pub fail_query: Option<&'static str>,
}

#[async_trait]
impl Tool for EchoSearch {
    fn name(&self) -> &'static str {
        "tavily_search"
    }

    fn description(&self) -> &'static str {
        "echo search"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]})
    }

    async fn execute(&self, input: Value) -> Result<Value, AgentError> {
        self.queries.lock().expect("queries lock").push(input.clone());
        if self.fail || self.fail_query.is_some_and(|query| input["query"] == query) {
            return Err(AgentError::Tool {
                tool: "tavily_search".to_string(),
                message: "search backend down".to_string(),
            });
        }
        Ok(json!([{ "title": "result", "url": "https://example.test", "content": input["query"] }]))
    }
}
