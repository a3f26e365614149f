use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Key of a persisted conversation thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Explicit session ids win; otherwise each client gets its own thread.
    pub fn resolve(client_id: &str, session_id: Option<&str>) -> Self {
        match session_id.map(str::trim).filter(|value| !value.is_empty()) {
            Some(session_id) => Self(format!("session:{session_id}")),
            None => Self(format!("client:{}", client_id.trim())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { tool_calls, ..Self::plain(Role::Assistant, content) }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { tool_call_id: Some(tool_call_id.into()), ..Self::plain(Role::Tool, content) }
    }

    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
    }
}

/// Message history of one thread. Updates append; nothing is ever replaced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
}

impl ConversationState {
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Tool calls of the trailing assistant message, if it asked for any.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        match self.last() {
            Some(message) if message.requests_tools() => &message.tool_calls,
            _ => &[],
        }
    }

    /// Answers every unanswered tool call of the latest tool request with
    /// `note`. Results already following the request are kept. Chat APIs
    /// reject histories where a tool call has no result.
    pub fn close_pending_tool_calls(&mut self, note: &str) -> usize {
        let Some(position) = self.messages.iter().rposition(|message| message.role != Role::Tool)
        else {
            return 0;
        };
        let request = &self.messages[position];
        if !request.requests_tools() {
            return 0;
        }

        let answered: HashSet<&str> = self.messages[position + 1..]
            .iter()
            .filter_map(|message| message.tool_call_id.as_deref())
            .collect();
        let open: Vec<String> = request
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .map(|call| call.id.clone())
            .collect();

        let closed = open.len();
        self.append(open.into_iter().map(|id| Message::tool_result(id, note)));
        closed
    }

    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Input,
    Reason,
    Act,
}

impl CheckpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Reason => "reason",
            Self::Act => "act",
        }
    }
}

impl std::str::FromStr for CheckpointSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "input" => Ok(Self::Input),
            "reason" => Ok(Self::Reason),
            "act" => Ok(Self::Act),
            other => Err(format!("unknown checkpoint source `{other}`")),
        }
    }
}

/// Snapshot of a thread's state after one graph step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub checkpoint_id: Uuid,
    pub step: i64,
    pub source: CheckpointSource,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        thread_id: ThreadId,
        step: i64,
        source: CheckpointSource,
        state: ConversationState,
    ) -> Self {
        Self {
            thread_id,
            checkpoint_id: Uuid::new_v4(),
            step,
            source,
            state,
            created_at: Utc::now(),
        }
    }
}
