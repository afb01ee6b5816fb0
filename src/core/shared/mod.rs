pub mod error;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod schema;
pub mod state;
pub mod store;
pub mod test_utils;
pub mod utils;

pub use error::{CrmError, CrmResult};
pub use models::*;
pub use state::AppState;
pub use store::{InsertOutcome, StoreError, Stores};
pub use utils::DbPool;
