use thiserror::Error;
use wkdesk_db::RepositoryError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent configuration invalid: {0}")]
    Configuration(String),
    #[error("{provider} request failed (status {status:?}): {message}")]
    Upstream { provider: &'static str, status: Option<u16>, message: String },
    #[error("{provider} transport error: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("tool `{tool}` failed: {message}")]
    Tool { tool: String, message: String },
    #[error("checkpoint store failure: {0}")]
    Checkpoint(#[from] RepositoryError),
}

impl AgentError {
    /// Failures worth another attempt: rate limits, server errors, and
    /// connections that never produced a response.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Upstream { status: Some(status), .. } => *status == 429 || *status >= 500,
            Self::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            _ => false,
        }
    }
}
