use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::realtime::{ChangeEvent, ChangeKind};
use crate::core::shared::error::{CrmError, CrmResult};
use crate::core::shared::models::{CompanyId, Followup};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{normalize_phone, parse_timestamp};
use crate::webhooks::{LeadData, ScheduleFollowupRequest, ScheduleFollowupResponse, WebhookError};

pub const SCHEDULE_FUNCTION: &str = "schedule-followup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Scheduled,
    Sent,
    Failed,
}

impl std::str::FromStr for FollowupStatus {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" | "pending" => Ok(Self::Scheduled),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(CrmError::Validation(format!(
                "unknown follow-up status: {}",
                other
            ))),
        }
    }
}

impl FollowupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Moves a follow-up forward. Only `scheduled` may change; `sent` always
/// carries a `sent_at`.
pub fn apply_delivery(
    followup: &mut Followup,
    outcome: FollowupStatus,
    detail: Option<String>,
    at: DateTime<Utc>,
) -> CrmResult<()> {
    let current: FollowupStatus = followup.status.parse()?;
    if current != FollowupStatus::Scheduled {
        return Err(CrmError::Validation(format!(
            "follow-up {} is already {}",
            followup.id,
            current.as_str()
        )));
    }

    match outcome {
        FollowupStatus::Sent => {
            followup.sent_at = Some(at);
            followup.error_detail = None;
        }
        FollowupStatus::Failed => {
            followup.error_detail = Some(detail.unwrap_or_else(|| "delivery failed".to_string()));
        }
        FollowupStatus::Scheduled => {
            return Err(CrmError::Validation(
                "a follow-up cannot move back to scheduled".into(),
            ))
        }
    }
    followup.status = outcome.as_str().to_string();
    followup.updated_at = at;
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleFollowupInput {
    pub phone: String,
    pub message: String,
    pub scheduled_for: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryReport {
    pub empresa_id: CompanyId,
    pub followup_id: i64,
    pub status: FollowupStatus,
    pub error: Option<String>,
    pub sent_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupView {
    pub id: i64,
    pub phone: String,
    pub message: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: String,
    pub error_detail: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<Followup> for FollowupView {
    fn from(f: Followup) -> Self {
        Self {
            id: f.id,
            phone: f.phone,
            message: f.message,
            scheduled_for: f.scheduled_for,
            status: f.status,
            error_detail: f.error_detail,
            sent_at: f.sent_at,
        }
    }
}

pub struct FollowupService {
    state: Arc<AppState>,
}

impl FollowupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Hands the follow-up to the external scheduler. Nothing is written
    /// locally; the scheduler owns the record.
    pub async fn schedule(
        &self,
        company_id: CompanyId,
        input: ScheduleFollowupInput,
    ) -> CrmResult<ScheduleFollowupResponse> {
        let phone = normalize_phone(&input.phone)?;
        let message = input.message.trim();
        if message.is_empty() {
            return Err(CrmError::Validation("message is required".into()));
        }
        let scheduled_for = parse_timestamp(&input.scheduled_for).ok_or_else(|| {
            CrmError::Validation(format!("invalid scheduled date: {}", input.scheduled_for))
        })?;
        if scheduled_for <= Utc::now() {
            return Err(CrmError::Validation(
                "scheduled date must be in the future".into(),
            ));
        }

        let lead = self
            .state
            .stores
            .leads
            .find_by_phone(company_id, &phone)
            .await?;
        let request = ScheduleFollowupRequest {
            lead_id: lead.as_ref().map(|l| l.id),
            empresa_id: company_id,
            scheduled_date: scheduled_for.to_rfc3339(),
            message: message.to_string(),
            lead_data: LeadData {
                name: lead
                    .map(|l| l.name)
                    .unwrap_or_else(|| format!("Lead {}", phone)),
                number: phone.clone(),
            },
        };

        let body = serde_json::to_value(&request)
            .map_err(|e| CrmError::Internal(format!("encode follow-up: {}", e)))?;
        let raw = self
            .state
            .integrations
            .invoke_function(SCHEDULE_FUNCTION, &body)
            .await?;
        let response: ScheduleFollowupResponse = serde_json::from_value(raw)
            .map_err(|e| CrmError::External(WebhookError::Decode(e.to_string())))?;

        if !response.success {
            let reason = response
                .error
                .clone()
                .unwrap_or_else(|| "follow-up was not scheduled".to_string());
            return Err(CrmError::External(WebhookError::Rejected(reason)));
        }

        info!(
            "Follow-up for {} in company {} scheduled at {}",
            phone, company_id, request.scheduled_date
        );
        self.state
            .changes
            .publish(ChangeEvent::new(company_id, ChangeKind::FollowupChanged, phone));
        Ok(response)
    }

    pub async fn list_for_phone(
        &self,
        company_id: CompanyId,
        raw_phone: &str,
    ) -> CrmResult<Vec<FollowupView>> {
        let phone = normalize_phone(raw_phone)?;
        let rows = self
            .state
            .stores
            .followups
            .list_for_phone(company_id, &phone)
            .await?;
        Ok(rows.into_iter().map(FollowupView::from).collect())
    }

    /// Records the scheduler's delivery result for one follow-up.
    pub async fn record_delivery(&self, report: DeliveryReport) -> CrmResult<FollowupView> {
        let mut followup = self
            .state
            .stores
            .followups
            .get(report.empresa_id, report.followup_id)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("follow-up {}", report.followup_id)))?;

        let at = match report.sent_at.as_deref() {
            Some(raw) => parse_timestamp(raw)
                .ok_or_else(|| CrmError::Validation(format!("invalid sent_at: {}", raw)))?,
            None => Utc::now(),
        };
        apply_delivery(&mut followup, report.status, report.error, at)?;
        self.state.stores.followups.save_status(&followup).await?;

        self.state.changes.publish(ChangeEvent::new(
            report.empresa_id,
            ChangeKind::FollowupChanged,
            followup.phone.as_str(),
        ));
        Ok(followup.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::TestAppStateBuilder;
    use chrono::Duration;
    use serde_json::json;

    fn scheduled(company_id: CompanyId, phone: &str) -> Followup {
        let now = Utc::now();
        Followup {
            id: 0,
            company_id,
            lead_id: None,
            phone: phone.into(),
            message: "Passando para saber se ficou alguma dúvida".into(),
            scheduled_for: now + Duration::hours(2),
            status: "scheduled".into(),
            error_detail: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_moves_forward_only() {
        let mut followup = scheduled(1, "5511999990000");
        let at = Utc::now();
        apply_delivery(&mut followup, FollowupStatus::Sent, None, at).unwrap();
        assert_eq!(followup.status, "sent");
        assert_eq!(followup.sent_at, Some(at));

        let again = apply_delivery(&mut followup, FollowupStatus::Failed, None, at);
        assert!(again.is_err());
        assert_eq!(followup.status, "sent");
    }

    #[test]
    fn test_failed_keeps_detail_and_no_sent_at() {
        let mut followup = scheduled(1, "5511999990000");
        apply_delivery(
            &mut followup,
            FollowupStatus::Failed,
            Some("number blocked".into()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(followup.status, "failed");
        assert!(followup.sent_at.is_none());
        assert_eq!(followup.error_detail.as_deref(), Some("number blocked"));
    }

    #[tokio::test]
    async fn test_schedule_builds_function_payload_for_unknown_lead() {
        let harness = TestAppStateBuilder::new().build();
        harness
            .webhooks
            .respond_with(
                "/schedule-followup",
                Ok(json!({
                    "success": true,
                    "message": "agendado",
                    "followup_id": 99,
                    "data_envio": "2030-01-01T10:00:00Z"
                })),
            )
            .await;
        let service = FollowupService::new(harness.state.clone());

        let when = (Utc::now() + Duration::days(1)).to_rfc3339();
        let response = service
            .schedule(
                5,
                ScheduleFollowupInput {
                    phone: "5511999990000".into(),
                    message: "Oi!".into(),
                    scheduled_for: when,
                },
            )
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.followup_id, Some(json!(99)));

        let calls = harness.webhooks.calls_to("/schedule-followup").await;
        assert_eq!(calls.len(), 1);
        let body = &calls[0].body;
        assert_eq!(body["empresaId"], json!(5));
        assert_eq!(body["leadId"], json!(null));
        assert_eq!(body["leadData"]["name"], json!("Lead 5511999990000"));
        assert_eq!(body["leadData"]["number"], json!("5511999990000"));
        assert_eq!(calls[0].bearer.as_deref(), Some("test-key"));
    }

    #[tokio::test]
    async fn test_schedule_validates_before_calling() {
        let harness = TestAppStateBuilder::new().build();
        let service = FollowupService::new(harness.state.clone());

        let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let err = service
            .schedule(
                5,
                ScheduleFollowupInput {
                    phone: "5511999990000".into(),
                    message: "Oi".into(),
                    scheduled_for: past,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));

        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let err = service
            .schedule(
                5,
                ScheduleFollowupInput {
                    phone: "5511999990000".into(),
                    message: "  ".into(),
                    scheduled_for: future,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));
        assert!(harness.webhooks.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_failure_response() {
        let harness = TestAppStateBuilder::new().build();
        harness
            .webhooks
            .respond_with(
                "/schedule-followup",
                Ok(json!({"success": false, "error": "limite diário atingido"})),
            )
            .await;
        let service = FollowupService::new(harness.state.clone());

        let err = service
            .schedule(
                5,
                ScheduleFollowupInput {
                    phone: "5511999990000".into(),
                    message: "Oi".into(),
                    scheduled_for: (Utc::now() + Duration::hours(3)).to_rfc3339(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CrmError::External(WebhookError::Rejected(ref reason))
                if reason == "limite diário atingido"
        ));
    }

    #[tokio::test]
    async fn test_record_delivery_persists() {
        let harness = TestAppStateBuilder::new().build();
        let seeded = harness.store.seed_followup(scheduled(5, "5511999990000")).await;
        let service = FollowupService::new(harness.state.clone());

        let view = service
            .record_delivery(DeliveryReport {
                empresa_id: 5,
                followup_id: seeded.id,
                status: FollowupStatus::Sent,
                error: None,
                sent_at: Some("2030-01-01T10:00:00Z".into()),
            })
            .await
            .unwrap();
        assert_eq!(view.status, "sent");

        let stored = service.list_for_phone(5, "5511999990000").await.unwrap();
        assert_eq!(stored[0].status, "sent");
        assert!(stored[0].sent_at.is_some());

        let wrong_company = service
            .record_delivery(DeliveryReport {
                empresa_id: 6,
                followup_id: seeded.id,
                status: FollowupStatus::Failed,
                error: None,
                sent_at: None,
            })
            .await;
        assert!(matches!(wrong_company, Err(CrmError::NotFound(_))));
    }
}
