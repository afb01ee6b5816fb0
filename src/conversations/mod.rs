//! WhatsApp conversations: grouping raw message rows into threads, plus the
//! resolve / send / inbound operations.

pub mod aggregator;
pub mod handlers;
pub mod payload;
pub mod service;

pub use aggregator::{aggregate, Aggregate, Conversation, ConversationMessage};
pub use handlers::configure;
pub use payload::MessagePayload;
pub use service::ConversationsService;
