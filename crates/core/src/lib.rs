pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{
    Checkpoint, CheckpointSource, ConversationState, Message, Role, ThreadId, ToolCall,
};
pub use domain::ticket::{Ticket, TicketId, UserInput, UserTicket};
pub use errors::{ApplicationError, DomainError, InterfaceError};
