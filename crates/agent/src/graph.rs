use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use wkdesk_core::domain::conversation::{
    Checkpoint, CheckpointSource, ConversationState, Message, ThreadId, ToolCall,
};
use wkdesk_db::CheckpointStore;

use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

pub const STEP_BUDGET_FALLBACK: &str =
    "I could not finish this request within the allowed number of steps. \
     Please try again or rephrase your question.";

const INTERRUPTED_TOOL_CALL: &str = "Tool call was not executed.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphNode {
    Reason,
    Act,
}

impl GraphNode {
    fn checkpoint_source(self) -> CheckpointSource {
        match self {
            Self::Reason => CheckpointSource::Reason,
            Self::Act => CheckpointSource::Act,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Act,
    End,
}

/// Edge taken after the reason node: tools if the model asked for any.
pub fn route_after_reason(state: &ConversationState) -> Route {
    if state.pending_tool_calls().is_empty() {
        Route::End
    } else {
        Route::Act
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub response: String,
    pub tool_invocations: usize,
    pub steps: u32,
    pub budget_exhausted: bool,
}

#[derive(Clone, Debug)]
pub struct GraphSettings {
    pub max_steps: u32,
    pub system_prompt: Option<String>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self { max_steps: 25, system_prompt: None }
    }
}

/// Two-node reason/act loop with a checkpoint after every step.
///
/// The graph does not serialize callers; two turns on the same thread must not
/// run concurrently. [`crate::runtime::AgentRuntime`] holds the per-thread lock.
pub struct AgentGraph {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: GraphSettings,
}

struct Cursor {
    thread_id: ThreadId,
    state: ConversationState,
    next_step: i64,
}

impl AgentGraph {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: GraphSettings,
    ) -> Self {
        Self { llm, tools, checkpoints, settings }
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    pub async fn invoke(&self, thread_id: &ThreadId, text: &str) -> Result<TurnOutcome, AgentError> {
        let mut cursor = self.resume(thread_id).await?;

        let closed = cursor.state.close_pending_tool_calls(INTERRUPTED_TOOL_CALL);
        if closed > 0 {
            warn!(
                event_name = "agent.graph.dangling_tool_calls",
                thread_id = %thread_id,
                closed,
                "closed tool calls left open by an earlier turn"
            );
        }

        cursor.state.append([Message::user(text)]);
        self.save(&mut cursor, CheckpointSource::Input).await?;

        let mut node = GraphNode::Reason;
        let mut steps = 0u32;
        let mut tool_invocations = 0usize;

        loop {
            if steps >= self.settings.max_steps {
                return self.exhaust(cursor, steps, tool_invocations).await;
            }

            match node {
                GraphNode::Reason => {
                    let reply = self.reason(&cursor.state).await?;
                    cursor.state.append([reply]);
                }
                GraphNode::Act => {
                    let calls = cursor.state.pending_tool_calls().to_vec();
                    tool_invocations += calls.len();
                    let (results, outcome) = self.act(&cursor.thread_id, &calls).await;
                    cursor.state.append(results);
                    if let Err(error) = outcome {
                        // Results of calls that finished are kept; the rest
                        // are closed when the thread is resumed.
                        self.save(&mut cursor, CheckpointSource::Act).await?;
                        return Err(error);
                    }
                }
            }
            steps += 1;
            self.save(&mut cursor, node.checkpoint_source()).await?;

            node = match node {
                GraphNode::Reason => match route_after_reason(&cursor.state) {
                    Route::Act => GraphNode::Act,
                    Route::End => break,
                },
                GraphNode::Act => GraphNode::Reason,
            };
        }

        let response = cursor.state.last_assistant_text().unwrap_or_default().to_string();
        info!(
            event_name = "agent.turn.completed",
            thread_id = %cursor.thread_id,
            steps,
            tool_invocations,
            "agent turn completed"
        );
        Ok(TurnOutcome { response, tool_invocations, steps, budget_exhausted: false })
    }

    async fn resume(&self, thread_id: &ThreadId) -> Result<Cursor, AgentError> {
        let cursor = match self.checkpoints.latest(thread_id).await? {
            Some(checkpoint) => Cursor {
                thread_id: thread_id.clone(),
                state: checkpoint.state,
                next_step: checkpoint.step + 1,
            },
            None => Cursor {
                thread_id: thread_id.clone(),
                state: ConversationState::default(),
                next_step: 0,
            },
        };
        debug!(
            event_name = "agent.graph.resumed",
            thread_id = %thread_id,
            messages = cursor.state.messages.len(),
            next_step = cursor.next_step,
            "thread state loaded"
        );
        Ok(cursor)
    }

    async fn save(&self, cursor: &mut Cursor, source: CheckpointSource) -> Result<(), AgentError> {
        let checkpoint =
            Checkpoint::new(cursor.thread_id.clone(), cursor.next_step, source, cursor.state.clone());
        self.checkpoints.put(checkpoint).await?;
        cursor.next_step += 1;
        Ok(())
    }

    async fn reason(&self, state: &ConversationState) -> Result<Message, AgentError> {
        let specs = self.tools.specs();
        match &self.settings.system_prompt {
            Some(prompt) => {
                let mut messages = Vec::with_capacity(state.messages.len() + 1);
                messages.push(Message::system(prompt.clone()));
                messages.extend(state.messages.iter().cloned());
                self.llm.complete(&messages, &specs).await
            }
            None => self.llm.complete(&state.messages, &specs).await,
        }
    }

    /// Runs the calls in order and stops at the first tool failure, returning
    /// the results gathered before it.
    async fn act(
        &self,
        thread_id: &ThreadId,
        calls: &[ToolCall],
    ) -> (Vec<Message>, Result<(), AgentError>) {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let Some(tool) = self.tools.get(&call.name) else {
                warn!(
                    event_name = "agent.tool.unknown",
                    thread_id = %thread_id,
                    tool = %call.name,
                    "model requested an unregistered tool"
                );
                results.push(Message::tool_result(
                    &call.id,
                    format!("Error: {} is not a valid tool, try one of [{}].", call.name, self.tool_names()),
                ));
                continue;
            };

            debug!(
                event_name = "agent.tool.invoked",
                thread_id = %thread_id,
                tool = %call.name,
                tool_call_id = %call.id,
                "executing tool call"
            );
            match tool.execute(call.arguments.clone()).await {
                Ok(output) => results.push(Message::tool_result(&call.id, render_tool_output(output))),
                Err(error) => return (results, Err(error)),
            }
        }
        (results, Ok(()))
    }

    async fn exhaust(
        &self,
        mut cursor: Cursor,
        steps: u32,
        tool_invocations: usize,
    ) -> Result<TurnOutcome, AgentError> {
        warn!(
            event_name = "agent.turn.budget_exhausted",
            thread_id = %cursor.thread_id,
            steps,
            max_steps = self.settings.max_steps,
            "step budget exhausted"
        );
        cursor.state.close_pending_tool_calls(INTERRUPTED_TOOL_CALL);
        cursor.state.append([Message::assistant(STEP_BUDGET_FALLBACK)]);
        self.save(&mut cursor, CheckpointSource::Reason).await?;

        Ok(TurnOutcome {
            response: STEP_BUDGET_FALLBACK.to_string(),
            tool_invocations,
            steps,
            budget_exhausted: true,
        })
    }

    fn tool_names(&self) -> String {
        self.tools.specs().into_iter().map(|spec| spec.name).collect::<Vec<_>>().join(", ")
    }
}

fn render_tool_output(output: Value) -> String {
    match output {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
