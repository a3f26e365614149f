use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument};
use wkdesk_core::config::{AgentConfig, LlmConfig, SearchConfig};
use wkdesk_core::domain::conversation::{ConversationState, ThreadId};
use wkdesk_db::CheckpointStore;

use crate::error::AgentError;
use crate::graph::{AgentGraph, GraphSettings, TurnOutcome};
use crate::llm::{AzureChatClient, LlmClient};
use crate::tools::{TavilySearchTool, ToolRegistry};

/// Entry point for chat turns. Turns on the same thread run one at a time;
/// different threads proceed concurrently.
pub struct AgentRuntime {
    graph: AgentGraph,
    // Entries are never evicted; one small mutex per thread ever seen.
    thread_locks: Mutex<HashMap<ThreadId, Arc<Mutex<()>>>>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: GraphSettings,
    ) -> Self {
        Self {
            graph: AgentGraph::new(llm, Arc::new(tools), checkpoints, settings),
            thread_locks: Mutex::default(),
        }
    }

    /// Builds the Azure chat client and the search tool from configuration.
    pub fn from_config(
        llm: &LlmConfig,
        search: &SearchConfig,
        agent: &AgentConfig,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, AgentError> {
        if agent.max_steps == 0 {
            return Err(AgentError::Configuration("agent.max_steps must be at least 1".to_string()));
        }

        let client = AzureChatClient::new(llm)?;
        let mut tools = ToolRegistry::default();
        tools.register(TavilySearchTool::from_config(search)?);

        info!(
            event_name = "agent.runtime.initialized",
            model = %client.model(),
            tools = tools.len(),
            max_steps = agent.max_steps,
            "agent runtime initialized"
        );

        Ok(Self::new(
            Arc::new(client),
            tools,
            checkpoints,
            GraphSettings { max_steps: agent.max_steps, system_prompt: agent.system_prompt.clone() },
        ))
    }

    #[instrument(skip_all, fields(thread_id = %thread_id))]
    pub async fn run_turn(&self, thread_id: &ThreadId, text: &str) -> Result<TurnOutcome, AgentError> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;
        self.graph.invoke(thread_id, text).await
    }

    pub async fn respond(&self, thread_id: &ThreadId, text: &str) -> Result<String, AgentError> {
        Ok(self.run_turn(thread_id, text).await?.response)
    }

    /// Latest stored message history of a thread; empty for unknown threads.
    pub async fn history(&self, thread_id: &ThreadId) -> Result<ConversationState, AgentError> {
        Ok(self
            .graph
            .checkpoints()
            .latest(thread_id)
            .await?
            .map(|checkpoint| checkpoint.state)
            .unwrap_or_default())
    }

    pub fn max_steps(&self) -> u32 {
        self.graph.settings().max_steps
    }

    async fn thread_lock(&self, thread_id: &ThreadId) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        locks.entry(thread_id.clone()).or_default().clone()
    }
}
