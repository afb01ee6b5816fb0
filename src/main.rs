use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crmserver::api_router::build_app;
use crmserver::core::config::AppConfig;
use crmserver::core::maintenance::spawn_purge_sweeper;
use crmserver::core::realtime::spawn_cache_invalidator;
use crmserver::core::shared::memory_store::MemoryStore;
use crmserver::core::shared::state::AppState;
use crmserver::core::shared::store::Stores;
use crmserver::core::shared::utils::{create_pool, run_migrations};
use crmserver::webhooks::HttpWebhookClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::load()?;

    let stores = match config.database.url.as_deref() {
        Some(url) => {
            let pool = create_pool(url, config.database.max_connections)?;
            run_migrations(&pool)?;
            Stores::postgres(pool)
        }
        None => {
            warn!("No database URL configured, using the in-memory store");
            Stores::memory(Arc::new(MemoryStore::new()))
        }
    };

    let client = HttpWebhookClient::new(Duration::from_secs(config.webhooks.timeout_secs))?;
    let address = config.bind_address();
    let state = Arc::new(AppState::new(config, stores, Arc::new(client)));

    spawn_cache_invalidator(&state.changes, state.cache.clone());
    spawn_purge_sweeper(state.clone());

    let listener = TcpListener::bind(&address).await?;
    info!("Starting HTTP server on {}", address);
    let app = build_app(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;
    Ok(())
}
