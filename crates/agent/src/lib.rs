//! Conversational agent for the help desk chat endpoint.
//!
//! A turn runs a two-node graph over the thread's message history:
//! - **Reason** (`graph`) asks the chat model (`llm`) for the next message,
//!   with every registered tool schema bound.
//! - **Act** (`tools`) executes the tool calls of that message and appends
//!   one result per call, then hands back to Reason.
//!
//! The turn ends when the model answers without tool calls or when the step
//! budget runs out. State is checkpointed after every step through
//! `wkdesk_db::CheckpointStore`, so a thread resumes where it stopped.
//!
//! # Key Types
//!
//! - `AgentRuntime` - per-thread serialized entry point (see `runtime`)
//! - `LlmClient` - chat model seam, `AzureChatClient` in production
//! - `Tool` / `ToolRegistry` - callable tools, `TavilySearchTool` in production

pub mod error;
pub mod graph;
pub mod llm;
pub mod runtime;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use error::AgentError;
pub use graph::{AgentGraph, GraphSettings, TurnOutcome, STEP_BUDGET_FALLBACK};
pub use llm::{AzureChatClient, LlmClient};
pub use runtime::AgentRuntime;
pub use tools::{TavilySearchTool, Tool, ToolRegistry, ToolSpec};
