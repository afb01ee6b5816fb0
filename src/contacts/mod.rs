//! Lead registry: add, list, stage/tag/board updates and full deletion.

pub mod handlers;
pub mod service;
pub mod types;

pub use handlers::configure;
pub use service::{purge_rows, ContactsService, PurgeCounts};
pub use types::*;
