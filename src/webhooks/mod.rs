pub mod payloads;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{FunctionsConfig, WebhookConfig};
pub use payloads::*;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("webhook transport error: {0}")]
    Transport(String),
    #[error("webhook response could not be decoded: {0}")]
    Decode(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// POSTs `body` as JSON. Any 2xx is success; an empty or non-JSON body
    /// decodes to `Value::Null` / `Value::String`.
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Value, WebhookError>;
}

pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WebhookError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Value, WebhookError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Outbound automation endpoints, resolved from config.
#[derive(Clone)]
pub struct Integrations {
    client: Arc<dyn WebhookClient>,
    webhooks: WebhookConfig,
    functions: FunctionsConfig,
}

impl Integrations {
    pub fn new(
        client: Arc<dyn WebhookClient>,
        webhooks: WebhookConfig,
        functions: FunctionsConfig,
    ) -> Self {
        Self {
            client,
            webhooks,
            functions,
        }
    }

    fn encode<T: Serialize>(payload: &T) -> Result<Value, WebhookError> {
        serde_json::to_value(payload).map_err(|e| WebhookError::Decode(e.to_string()))
    }

    pub async fn satisfaction_survey(&self, payload: &SurveyPayload) -> Result<(), WebhookError> {
        let url = self
            .webhooks
            .satisfaction_survey_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("satisfaction survey webhook"))?;
        self.client
            .post_json(url, &Self::encode(payload)?, None)
            .await?;
        Ok(())
    }

    pub async fn send_chat(&self, payload: &ChatSendPayload) -> Result<Value, WebhookError> {
        let url = self
            .webhooks
            .chat_send_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("chat send webhook"))?;
        self.client
            .post_json(url, &Self::encode(payload)?, None)
            .await
    }

    pub async fn nps_after_appointment(&self, payload: &NpsPayload) -> Result<Value, WebhookError> {
        let url = self
            .webhooks
            .nps_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("NPS webhook"))?;
        self.client
            .post_json(url, &Self::encode(payload)?, None)
            .await
    }

    /// Calls `<functions.base_url>/<name>` with the configured API key.
    pub async fn invoke_function(&self, name: &str, body: &Value) -> Result<Value, WebhookError> {
        let base = self
            .functions
            .base_url
            .as_deref()
            .ok_or(WebhookError::NotConfigured("serverless functions"))?;
        let url = format!("{}/{}", base.trim_end_matches('/'), name);
        self.client
            .post_json(&url, body, self.functions.api_key.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn integrations_for(server: &mockito::ServerGuard) -> Integrations {
        let client = HttpWebhookClient::new(Duration::from_secs(5)).unwrap();
        Integrations::new(
            Arc::new(client),
            WebhookConfig {
                satisfaction_survey_url: Some(format!("{}/survey", server.url())),
                chat_send_url: Some(format!("{}/send", server.url())),
                nps_url: None,
                timeout_secs: 5,
            },
            FunctionsConfig {
                base_url: Some(format!("{}/functions/v1/", server.url())),
                api_key: Some("anon-key".into()),
            },
        )
    }

    #[tokio::test]
    async fn test_survey_posts_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/survey")
            .match_body(mockito::Matcher::Json(json!({
                "empresa_id": 5,
                "nome": "Ana",
                "numero": "5511999990000",
                "chat_id": "5511999990000"
            })))
            .with_status(200)
            .create_async()
            .await;

        let integrations = integrations_for(&server);
        integrations
            .satisfaction_survey(&SurveyPayload {
                empresa_id: 5,
                nome: "Ana".into(),
                numero: "5511999990000".into(),
                chat_id: "5511999990000".into(),
            })
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/send")
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let integrations = integrations_for(&server);
        let err = integrations
            .send_chat(&ChatSendPayload {
                empresa_id: 1,
                nome: "Ana".into(),
                telefone: "5511999990000".into(),
                mensagem: "oi".into(),
                remetente: "agent".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WebhookError::Status {
                status: 500,
                body: "upstream down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_function_call_sends_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/functions/v1/schedule-followup")
            .match_header("authorization", "Bearer anon-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"followup_id":12}"#)
            .create_async()
            .await;

        let integrations = integrations_for(&server);
        let value = integrations
            .invoke_function("schedule-followup", &json!({}))
            .await
            .unwrap();
        assert_eq!(value["followup_id"], json!(12));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unconfigured_webhook() {
        let server = mockito::Server::new_async().await;
        let integrations = integrations_for(&server);
        let err = integrations
            .nps_after_appointment(&NpsPayload {
                empresa_id: 1,
                numero: "1".into(),
                nome: "x".into(),
                data_agendamento: "2030-01-01".into(),
                hora_agendamento: "10:00".into(),
                servico: "s".into(),
                email: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::NotConfigured(_)));
    }
}
