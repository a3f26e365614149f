use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use wkdesk_core::config::SearchConfig;

use crate::error::AgentError;

/// Schema advertised to the model for one callable tool.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the `arguments` object the model must send.
    fn parameters(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<Value, AgentError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool));
    }

    /// Registers a tool the caller keeps a handle to. A later tool with the
    /// same name replaces the earlier one.
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Specs in name order, so requests to the model are stable.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub const TAVILY_SEARCH_TOOL: &str = "tavily_search";

/// Web search backed by the Tavily API.
pub struct TavilySearchTool {
    http: reqwest::Client,
    api_key: SecretString,
    search_url: String,
    max_results: u32,
}

impl TavilySearchTool {
    pub fn from_config(config: &SearchConfig) -> Result<Self, AgentError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| AgentError::Configuration("search.api_key is not set".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|source| AgentError::Transport { provider: "tavily", source })?;

        Ok(Self {
            http,
            api_key,
            search_url: format!("{}/search", config.base_url.trim_end_matches('/')),
            max_results: config.max_results,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchArguments {
    query: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &'static str {
        TAVILY_SEARCH_TOOL
    }

    fn description(&self) -> &'static str {
        "Search the web for current information. Use it for news, weather, prices, \
         and anything that may have changed recently."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query to look up"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, AgentError> {
        let query = match input {
            Value::String(query) => query,
            other => {
                serde_json::from_value::<SearchArguments>(other)
                    .map_err(|error| AgentError::Tool {
                        tool: TAVILY_SEARCH_TOOL.to_string(),
                        message: format!("invalid arguments: {error}"),
                    })?
                    .query
            }
        };

        debug!(event_name = "agent.tool.search", max_results = self.max_results, %query, "searching");

        let response = self
            .http
            .post(&self.search_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "query": query, "max_results": self.max_results }))
            .send()
            .await
            .map_err(|source| AgentError::Transport { provider: "tavily", source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Upstream {
                provider: "tavily",
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let parsed = response
            .json::<TavilyResponse>()
            .await
            .map_err(|source| AgentError::Transport { provider: "tavily", source })?;

        serde_json::to_value(parsed.results).map_err(|error| AgentError::Tool {
            tool: TAVILY_SEARCH_TOOL.to_string(),
            message: error.to_string(),
        })
    }
}
