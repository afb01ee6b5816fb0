use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::core::cache::TtlCache;
use crate::core::config::AppConfig;
use crate::core::rate_limit::FixedWindowLimiter;
use crate::core::realtime::ChangeFeed;
use crate::core::shared::store::Stores;
use crate::favorites::FavoritesStore;
use crate::webhooks::{Integrations, WebhookClient};

pub struct AppState {
    pub config: AppConfig,
    pub stores: Stores,
    pub integrations: Integrations,
    pub rate_limits: FixedWindowLimiter,
    pub cache: Arc<TtlCache<Value>>,
    pub changes: ChangeFeed,
    pub favorites: FavoritesStore,
}

impl AppState {
    pub fn new(config: AppConfig, stores: Stores, webhook_client: Arc<dyn WebhookClient>) -> Self {
        let integrations = Integrations::new(
            webhook_client,
            config.webhooks.clone(),
            config.functions.clone(),
        );
        Self {
            rate_limits: FixedWindowLimiter::from_config(&config.rate_limit),
            cache: Arc::new(TtlCache::new(Duration::from_secs(config.cache.ttl_secs))),
            changes: ChangeFeed::new(256),
            favorites: FavoritesStore::new(
                config.storage.data_dir.clone(),
                config.storage.namespace.clone(),
            ),
            integrations,
            stores,
            config,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("stores", &self.stores)
            .field("rate_limits", &self.rate_limits)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
