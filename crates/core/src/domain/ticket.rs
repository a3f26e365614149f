use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub Uuid);

impl TicketId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Key under which the ticket is persisted.
    pub fn storage_key(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TicketId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

/// Free-text request payload submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    pub text: String,
    pub client_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub client_id: String,
    pub ticket_id: TicketId,
    pub timestamp: DateTime<Utc>,
    pub error_message: String,
    pub beanstandung: String,
    pub car_part: String,
    pub error_description: String,
    pub link_to_logs: String,
    pub severity: String,
}

impl Ticket {
    /// Opens a ticket from raw user input. Workshop fields start blank.
    pub fn open(ticket_id: TicketId, timestamp: DateTime<Utc>, input: UserInput) -> Self {
        Self {
            client_id: input.client_id,
            ticket_id,
            timestamp,
            error_message: input.text,
            beanstandung: String::new(),
            car_part: String::new(),
            error_description: String::new(),
            link_to_logs: String::new(),
            severity: String::new(),
        }
    }
}

/// Client-facing projection of a [`Ticket`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTicket {
    pub client_id: String,
    pub ticket_id: TicketId,
    pub timestamp: DateTime<Utc>,
    pub error_message: String,
}

impl From<&Ticket> for UserTicket {
    fn from(ticket: &Ticket) -> Self {
        Self {
            client_id: ticket.client_id.clone(),
            ticket_id: ticket.ticket_id,
            timestamp: ticket.timestamp,
            error_message: ticket.error_message.clone(),
        }
    }
}
