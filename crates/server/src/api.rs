use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;
use wkdesk_core::domain::conversation::ThreadId;
use wkdesk_core::{ApplicationError, DomainError, InterfaceError, Ticket, TicketId, UserInput};
use wkdesk_db::DbPool;

use crate::health;
use crate::orchestrator::{ChatRequest, TicketOrchestrator};

const ANONYMOUS_CLIENT: &str = "anonymous";

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<TicketOrchestrator>,
}

#[derive(Debug, Serialize)]
pub struct RootMessage {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct NotFound {
    pub error: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub user_input: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Interface error rendered as its status code and user-safe message.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut response = (status, self.0.user_message()).into_response();
        if let Ok(value) = HeaderValue::from_str(self.0.correlation_id()) {
            response.headers_mut().insert("x-correlation-id", value);
        }
        response
    }
}

pub fn router(orchestrator: Arc<TicketOrchestrator>, storage_pool: DbPool) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ticket", post(create_ticket).get(list_tickets))
        .route("/ticket/{ticket_id}", get(read_ticket))
        .route("/chat", post(chat))
        .with_state(ApiState { orchestrator })
        .merge(health::router(storage_pool))
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<RootMessage> {
    Json(RootMessage { message: "Hello from wkdesk!" })
}

async fn create_ticket(
    State(state): State<ApiState>,
    Json(input): Json<UserInput>,
) -> Result<Json<TicketId>, ApiError> {
    let ticket_id = state.orchestrator.add_ticket(input).await.map_err(reject)?;
    Ok(Json(ticket_id))
}

async fn read_ticket(
    State(state): State<ApiState>,
    Path(ticket_id): Path<String>,
) -> Result<Response, ApiError> {
    let ticket_id = ticket_id.parse::<TicketId>().map_err(|parse_error| {
        reject(ApplicationError::from(DomainError::InvariantViolation(format!(
            "ticket id `{ticket_id}` is not a UUID: {parse_error}"
        ))))
    })?;

    match state.orchestrator.get_ticket(ticket_id).await.map_err(reject)? {
        Some(ticket) => Ok(Json(ticket).into_response()),
        None => {
            info!(event_name = "api.ticket.not_found", ticket_id = %ticket_id, "ticket not found");
            Ok((StatusCode::NOT_FOUND, Json(NotFound { error: "Ticket not found" })).into_response())
        }
    }
}

async fn list_tickets(State(state): State<ApiState>) -> Result<Json<Vec<Ticket>>, ApiError> {
    let tickets = state.orchestrator.get_all_tickets().await.map_err(reject)?;
    Ok(Json(tickets))
}

async fn chat(
    State(state): State<ApiState>,
    Query(params): Query<ChatParams>,
) -> Result<Json<String>, ApiError> {
    let client_id = params.client_id.as_deref().unwrap_or(ANONYMOUS_CLIENT);
    let thread_id = ThreadId::resolve(client_id, params.session_id.as_deref());

    let response = state
        .orchestrator
        .chat(ChatRequest { text: params.user_input, thread_id })
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

fn reject(application_error: ApplicationError) -> ApiError {
    let interface = application_error.into_interface(correlation_id());
    match &interface {
        InterfaceError::BadRequest { message, correlation_id } => warn!(
            event_name = "api.request.rejected",
            correlation_id = %correlation_id,
            error = %message,
            "request rejected"
        ),
        InterfaceError::ServiceUnavailable { message, correlation_id }
        | InterfaceError::Internal { message, correlation_id } => error!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            error = %message,
            "request failed"
        ),
    }
    ApiError(interface)
}
