pub mod api_router;
pub mod contacts;
pub mod conversations;
pub mod core;
pub mod dashboards;
pub mod favorites;
pub mod followups;
pub mod webhooks;

pub use crate::core::config::AppConfig;
pub use crate::core::shared::error::{CrmError, CrmResult};
pub use crate::core::shared::state::AppState;
