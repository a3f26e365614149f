use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use wkdesk_agent::{AgentError, AgentRuntime};
use wkdesk_core::domain::conversation::ThreadId;
use wkdesk_core::{ApplicationError, DomainError, Ticket, TicketId, UserInput};
use wkdesk_db::{KeyValueStore, RepositoryError};

/// Chat request after HTTP parameters are resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub text: String,
    pub thread_id: ThreadId,
}

/// Coordinates ticket persistence and the chat agent behind the HTTP surface.
pub struct TicketOrchestrator {
    store: Arc<dyn KeyValueStore>,
    agent: Arc<AgentRuntime>,
}

impl TicketOrchestrator {
    pub fn new(store: Arc<dyn KeyValueStore>, agent: Arc<AgentRuntime>) -> Self {
        Self { store, agent }
    }

    pub async fn add_ticket(&self, input: UserInput) -> Result<TicketId, ApplicationError> {
        let ticket = Ticket::open(TicketId::generate(), Utc::now(), input);
        let key = ticket.ticket_id.storage_key();
        let encoded = serde_json::to_string(&ticket)
            .map_err(|error| ApplicationError::Persistence(format!("encode ticket: {error}")))?;

        self.store.set(&key, &encoded).await.map_err(persistence)?;

        info!(
            event_name = "ticket.created",
            ticket_id = %ticket.ticket_id,
            client_id = %ticket.client_id,
            "ticket stored"
        );
        Ok(ticket.ticket_id)
    }

    /// `Ok(None)` when no ticket is stored under `ticket_id`.
    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, ApplicationError> {
        let key = ticket_id.storage_key();
        let Some(raw) = self.store.get(&key).await.map_err(persistence)? else {
            return Ok(None);
        };

        decode_ticket(&key, &raw).map(Some).map_err(ApplicationError::from)
    }

    pub async fn get_all_tickets(&self) -> Result<Vec<Ticket>, ApplicationError> {
        let items = self.store.items().await.map_err(persistence)?;
        let mut tickets = Vec::with_capacity(items.len());
        for (key, raw) in items {
            match decode_ticket(&key, &raw) {
                Ok(ticket) => tickets.push(ticket),
                Err(error) => warn!(
                    event_name = "ticket.skipped_malformed",
                    key = %key,
                    error = %error,
                    "stored value is not a ticket"
                ),
            }
        }
        Ok(tickets)
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<String, ApplicationError> {
        self.agent.respond(&request.thread_id, &request.text).await.map_err(integration)
    }
}

fn decode_ticket(key: &str, raw: &str) -> Result<Ticket, DomainError> {
    serde_json::from_str(raw)
        .map_err(|error| DomainError::MalformedRecord { key: key.to_string(), detail: error.to_string() })
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn integration(error: AgentError) -> ApplicationError {
    match error {
        AgentError::Configuration(message) => ApplicationError::Configuration(message),
        AgentError::Checkpoint(error) => persistence(error),
        other => ApplicationError::Integration(other.to_string()),
    }
}
