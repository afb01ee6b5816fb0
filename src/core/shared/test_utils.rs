//! Fixtures shared by unit tests and the integration tests under `tests/`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::config::{AppConfig, LimitsConfig, RateLimitConfig};
use crate::core::shared::memory_store::MemoryStore;
use crate::core::shared::state::AppState;
use crate::core::shared::store::Stores;
use crate::webhooks::{WebhookClient, WebhookError};

pub const SURVEY_URL: &str = "http://hooks.test/satisfaction-survey";
pub const CHAT_SEND_URL: &str = "http://hooks.test/chat-send";
pub const NPS_URL: &str = "http://hooks.test/nps";
pub const FUNCTIONS_URL: &str = "http://functions.test/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub url: String,
    pub body: Value,
    pub bearer: Option<String>,
}

/// Webhook client that records every call and answers from a script keyed by
/// URL suffix. Unscripted URLs answer `{"success": true}`.
#[derive(Debug, Default)]
pub struct RecordingWebhookClient {
    calls: Mutex<Vec<RecordedCall>>,
    responses: Mutex<Vec<(String, Result<Value, WebhookError>)>>,
}

impl RecordingWebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn respond_with(&self, url_suffix: &str, response: Result<Value, WebhookError>) {
        self.responses
            .lock()
            .await
            .push((url_suffix.to_string(), response));
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_to(&self, url_suffix: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.url.ends_with(url_suffix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhookClient {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Value, WebhookError> {
        self.calls.lock().await.push(RecordedCall {
            url: url.to_string(),
            body: body.clone(),
            bearer: bearer.map(str::to_string),
        });

        let responses = self.responses.lock().await;
        responses
            .iter()
            .rev()
            .find(|(suffix, _)| url.ends_with(suffix.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Ok(json!({ "success": true })))
    }
}

pub struct TestHarness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub webhooks: Arc<RecordingWebhookClient>,
}

#[derive(Debug)]
pub struct TestAppStateBuilder {
    config: AppConfig,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.webhooks.satisfaction_survey_url = Some(SURVEY_URL.to_string());
        config.webhooks.chat_send_url = Some(CHAT_SEND_URL.to_string());
        config.webhooks.nps_url = Some(NPS_URL.to_string());
        config.functions.base_url = Some(FUNCTIONS_URL.to_string());
        config.functions.api_key = Some("test-key".to_string());
        config.rate_limit.enabled = false;
        config.cache.ttl_secs = 0;
        config.storage.data_dir =
            std::env::temp_dir().join(format!("crmserver-test-{}", Uuid::new_v4()));
        Self { config }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.data_dir = dir;
        self
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.config.limits = limits;
        self
    }

    /// Turns the limiter on with the given budgets.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = RateLimitConfig {
            enabled: true,
            ..rate_limit
        };
        self
    }

    pub fn with_super_admin(mut self, email: &str) -> Self {
        self.config.auth.super_admin_email = Some(email.to_string());
        self
    }

    pub fn build(self) -> TestHarness {
        let store = Arc::new(MemoryStore::new());
        let webhooks = Arc::new(RecordingWebhookClient::new());
        let state = AppState::new(self.config, Stores::memory(store.clone()), webhooks.clone());
        TestHarness {
            state: Arc::new(state),
            store,
            webhooks,
        }
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
