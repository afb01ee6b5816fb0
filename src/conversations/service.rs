use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::aggregator::{aggregate, Conversation, ConversationMessage};
use super::payload::{Author, MessagePayload, Role};
use crate::contacts::WHATSAPP_ORIGIN;
use crate::core::cache::company_prefix;
use crate::core::permissions::Caller;
use crate::core::realtime::{ChangeEvent, ChangeKind};
use crate::core::shared::error::{CrmError, CrmResult};
use crate::core::shared::models::{CompanyId, NewLead, NewMessage, Stage};
use crate::core::shared::state::AppState;
use crate::core::shared::store::{InsertOutcome, StoreError};
use crate::core::shared::utils::{normalize_phone, parse_timestamp};
use crate::webhooks::{ChatSendPayload, SurveyPayload};

const MAX_OUTBOUND_CHARS: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub lead_name: Option<String>,
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
    pub last_message_preview: String,
    pub unread: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationList {
    pub conversations: Vec<ConversationSummary>,
    pub total_conversations: usize,
    pub active_sessions: usize,
    pub average_messages: f64,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub session_id: String,
    pub marker: InsertOutcome,
    pub survey_sent: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub sender_name: Option<String>,
}

/// Result of a send. `delivered` reflects the chat webhook; a failure to
/// record the message locally afterwards only sets `warning`.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub delivered: bool,
    pub message: Option<ConversationMessage>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub phone: String,
    pub name: Option<String>,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub received_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub session_id: String,
    pub message_id: i64,
    pub lead_created: bool,
}

pub struct ConversationsService {
    state: Arc<AppState>,
}

impl ConversationsService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn cache_key(company_id: CompanyId) -> String {
        format!("{}conversations", company_prefix(company_id))
    }

    async fn display_name(&self, company_id: CompanyId, session_id: &str) -> CrmResult<String> {
        let lead = match normalize_phone(session_id) {
            Ok(phone) => self.state.stores.leads.find_by_phone(company_id, &phone).await?,
            Err(_) => None,
        };
        Ok(lead
            .map(|l| l.name)
            .unwrap_or_else(|| format!("Lead {}", session_id)))
    }

    pub async fn list(&self, company_id: CompanyId) -> CrmResult<ConversationList> {
        let key = Self::cache_key(company_id);
        if let Some(cached) = self.state.cache.get(&key).await {
            if let Ok(list) = serde_json::from_value::<ConversationList>(cached) {
                return Ok(list);
            }
        }

        let limits = &self.state.config.limits;
        let rows = self
            .state
            .stores
            .messages
            .recent(company_id, limits.message_window)
            .await?;
        let leads = self
            .state
            .stores
            .leads
            .list(company_id, limits.lead_snapshot)
            .await?;

        let now = Utc::now();
        let result = aggregate(rows, limits.message_window, now);
        let conversations = result
            .conversations
            .iter()
            .map(|c| ConversationSummary {
                lead_name: leads
                    .iter()
                    .find(|l| l.phone == c.session_id)
                    .map(|l| l.name.clone()),
                session_id: c.session_id.clone(),
                message_count: c.message_count,
                last_activity: c.last_activity,
                last_message_preview: c.last_message_preview.clone(),
                unread: c.unread,
                active: c.is_active(now),
            })
            .collect::<Vec<_>>();

        let list = ConversationList {
            total_conversations: conversations.len(),
            conversations,
            active_sessions: result.active_sessions,
            average_messages: result.average_messages,
            truncated: result.truncated,
        };
        if let Ok(value) = serde_json::to_value(&list) {
            self.state.cache.insert(key, value).await;
        }
        Ok(list)
    }

    pub async fn get(&self, company_id: CompanyId, session_id: &str) -> CrmResult<Conversation> {
        let window = self.state.config.limits.message_window;
        let rows = self
            .state
            .stores
            .messages
            .for_session(company_id, session_id, window)
            .await?;
        aggregate(rows, window, Utc::now())
            .conversations
            .into_iter()
            .next()
            .ok_or_else(|| CrmError::NotFound(format!("conversation {}", session_id)))
    }

    /// Marks the conversation resolved, then asks the automation side to send
    /// the satisfaction survey. The marker survives a failed survey call so
    /// the request can simply be repeated.
    pub async fn resolve(
        &self,
        company_id: CompanyId,
        session_id: &str,
    ) -> CrmResult<ResolveOutcome> {
        let marker = self
            .state
            .stores
            .resolutions
            .insert_if_absent(company_id, session_id, Utc::now())
            .await?;
        if marker == InsertOutcome::Inserted {
            self.state.changes.publish(ChangeEvent::new(
                company_id,
                ChangeKind::ConversationResolved,
                session_id,
            ));
        }

        let nome = self.display_name(company_id, session_id).await?;
        self.state
            .integrations
            .satisfaction_survey(&SurveyPayload {
                empresa_id: company_id,
                nome,
                numero: session_id.to_string(),
                chat_id: session_id.to_string(),
            })
            .await
            .map_err(|e| {
                warn!(
                    "Survey for {} in company {} failed: {}",
                    session_id, company_id, e
                );
                CrmError::External(e)
            })?;

        info!("Conversation {} resolved in company {}", session_id, company_id);
        Ok(ResolveOutcome {
            session_id: session_id.to_string(),
            marker,
            survey_sent: true,
        })
    }

    pub async fn send(
        &self,
        company_id: CompanyId,
        session_id: &str,
        caller: &Caller,
        request: SendMessageRequest,
    ) -> CrmResult<SendOutcome> {
        let text = request.message.trim();
        if text.is_empty() {
            return Err(CrmError::Validation("message is required".into()));
        }
        if text.chars().count() > MAX_OUTBOUND_CHARS {
            return Err(CrmError::Validation(format!(
                "message must be at most {} characters",
                MAX_OUTBOUND_CHARS
            )));
        }

        let remetente = request
            .sender_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| caller.email.clone())
            .unwrap_or_else(|| "agent".to_string());
        let nome = self.display_name(company_id, session_id).await?;

        self.state
            .integrations
            .send_chat(&ChatSendPayload {
                empresa_id: company_id,
                nome,
                telefone: session_id.to_string(),
                mensagem: text.to_string(),
                remetente,
            })
            .await?;

        let payload = MessagePayload::agent_text(text);
        let appended = self
            .state
            .stores
            .messages
            .append(NewMessage {
                company_id,
                session_id: Some(session_id.to_string()),
                message: payload.to_stored(),
                created_at: Utc::now(),
            })
            .await;

        match appended {
            Ok(row) => {
                self.state.changes.publish(ChangeEvent::new(
                    company_id,
                    ChangeKind::MessageAppended,
                    session_id,
                ));
                Ok(SendOutcome {
                    delivered: true,
                    message: Some(row.into()),
                    warning: None,
                })
            }
            Err(e) => {
                warn!(
                    "Message to {} delivered but not recorded for company {}: {}",
                    session_id, company_id, e
                );
                Ok(SendOutcome {
                    delivered: true,
                    message: None,
                    warning: Some(format!("message delivered but not saved: {}", e)),
                })
            }
        }
    }

    /// Records a message from the contact and creates the lead the first time
    /// a phone number writes in.
    pub async fn ingest(
        &self,
        company_id: CompanyId,
        inbound: InboundMessage,
    ) -> CrmResult<IngestOutcome> {
        let phone = normalize_phone(&inbound.phone)?;
        let payload = match (&inbound.media_url, &inbound.content) {
            (Some(url), _) if !url.trim().is_empty() => MessagePayload::Attachment {
                role: Role::Human,
                author: Author::Contact,
                url: url.trim().to_string(),
                mime_type: inbound.mime_type.clone(),
                caption: inbound.caption.clone().or_else(|| inbound.content.clone()),
            },
            (_, Some(text)) if !text.trim().is_empty() => MessagePayload::contact_text(text.trim()),
            _ => {
                return Err(CrmError::Validation(
                    "inbound message needs content or media_url".into(),
                ))
            }
        };
        let created_at = match inbound.received_at.as_deref() {
            Some(raw) => parse_timestamp(raw)
                .ok_or_else(|| CrmError::Validation(format!("invalid received_at: {}", raw)))?,
            None => Utc::now(),
        };

        let row = self
            .state
            .stores
            .messages
            .append(NewMessage {
                company_id,
                session_id: Some(phone.clone()),
                message: payload.to_stored(),
                created_at,
            })
            .await?;
        self.state.changes.publish(ChangeEvent::new(
            company_id,
            ChangeKind::MessageAppended,
            phone.as_str(),
        ));

        let lead_created = self.ensure_lead(company_id, &phone, inbound.name).await?;
        Ok(IngestOutcome {
            session_id: phone,
            message_id: row.id,
            lead_created,
        })
    }

    async fn ensure_lead(
        &self,
        company_id: CompanyId,
        phone: &str,
        name: Option<String>,
    ) -> CrmResult<bool> {
        let leads = &self.state.stores.leads;
        if leads.find_by_phone(company_id, phone).await?.is_some() {
            return Ok(false);
        }

        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Lead {}", phone));
        let inserted = leads
            .insert(NewLead {
                company_id,
                name,
                phone: phone.to_string(),
                stage: Some(Stage::New.ordinal()),
                qualification: None,
                tags: vec![WHATSAPP_ORIGIN.to_string()],
                origin: WHATSAPP_ORIGIN.to_string(),
            })
            .await;

        match inserted {
            Ok(_) => {
                info!("First contact from {} created lead in company {}", phone, company_id);
                self.state
                    .changes
                    .publish(ChangeEvent::new(company_id, ChangeKind::LeadCreated, phone));
                Ok(true)
            }
            // created concurrently by another inbound message
            Err(StoreError::UniqueViolation) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
