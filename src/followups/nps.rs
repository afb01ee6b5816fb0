//! NPS survey after an appointment. The automation answers with
//! `{"success": "nps_pos_agenda_enviado"}` when the survey went out; any
//! other answer counts as a failure.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::core::shared::error::{CrmError, CrmResult};
use crate::core::shared::models::CompanyId;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::normalize_phone;
use crate::webhooks::{NpsPayload, WebhookError};

pub const NPS_SENT_MARKER: &str = "nps_pos_agenda_enviado";

#[derive(Debug, Clone, Deserialize)]
pub struct NpsRequest {
    pub phone: String,
    pub name: String,
    /// `YYYY-MM-DD`
    pub appointment_date: String,
    /// `HH:MM`
    pub appointment_time: String,
    pub service: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NpsOutcome {
    pub sent: bool,
    pub phone: String,
}

pub fn survey_was_sent(response: &Value) -> bool {
    response.get("success").and_then(Value::as_str) == Some(NPS_SENT_MARKER)
}

fn build_payload(company_id: CompanyId, request: &NpsRequest) -> CrmResult<NpsPayload> {
    let numero = normalize_phone(&request.phone)?;
    let nome = request.name.trim();
    if nome.is_empty() {
        return Err(CrmError::Validation("name is required".into()));
    }
    let date = NaiveDate::parse_from_str(request.appointment_date.trim(), "%Y-%m-%d")
        .map_err(|_| CrmError::Validation("appointment_date must be YYYY-MM-DD".into()))?;
    let time = NaiveTime::parse_from_str(request.appointment_time.trim(), "%H:%M")
        .map_err(|_| CrmError::Validation("appointment_time must be HH:MM".into()))?;
    let servico = request.service.trim();
    if servico.is_empty() {
        return Err(CrmError::Validation("service is required".into()));
    }

    Ok(NpsPayload {
        empresa_id: company_id,
        numero,
        nome: nome.to_string(),
        data_agendamento: date.format("%Y-%m-%d").to_string(),
        hora_agendamento: time.format("%H:%M").to_string(),
        servico: servico.to_string(),
        email: request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string),
    })
}

pub async fn send_after_appointment(
    state: &Arc<AppState>,
    company_id: CompanyId,
    request: NpsRequest,
) -> CrmResult<NpsOutcome> {
    let payload = build_payload(company_id, &request)?;
    let response = state.integrations.nps_after_appointment(&payload).await?;
    if !survey_was_sent(&response) {
        log::warn!(
            "NPS for {} in company {} not confirmed: {}",
            payload.numero,
            company_id,
            response
        );
        return Err(CrmError::External(WebhookError::Rejected(format!(
            "unexpected NPS response: {}",
            response
        ))));
    }

    log::info!("NPS survey sent to {} for company {}", payload.numero, company_id);
    Ok(NpsOutcome {
        sent: true,
        phone: payload.numero,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::TestAppStateBuilder;
    use serde_json::json;

    fn request() -> NpsRequest {
        NpsRequest {
            phone: "5511999990000".into(),
            name: "Ana".into(),
            appointment_date: "2030-01-02".into(),
            appointment_time: "14:30".into(),
            service: "Limpeza".into(),
            email: Some(" ".into()),
        }
    }

    #[test]
    fn test_only_exact_marker_counts() {
        assert!(survey_was_sent(&json!({"success": "nps_pos_agenda_enviado"})));
        assert!(!survey_was_sent(&json!({"success": true})));
        assert!(!survey_was_sent(&json!(null)));
    }

    #[tokio::test]
    async fn test_sends_payload_and_checks_marker() {
        let harness = TestAppStateBuilder::new().build();
        harness
            .webhooks
            .respond_with("/nps", Ok(json!({"success": NPS_SENT_MARKER})))
            .await;

        let outcome = send_after_appointment(&harness.state, 4, request())
            .await
            .unwrap();
        assert!(outcome.sent);

        let call = &harness.webhooks.calls_to("/nps").await[0];
        assert_eq!(call.body["hora_agendamento"], json!("14:30"));
        assert!(call.body.get("email").is_none());
    }

    #[tokio::test]
    async fn test_generic_success_is_not_enough() {
        let harness = TestAppStateBuilder::new().build();
        let err = send_after_appointment(&harness.state, 4, request())
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::External(WebhookError::Rejected(_))));
    }

    #[test]
    fn test_rejects_bad_time() {
        let mut bad = request();
        bad.appointment_time = "2pm".into();
        assert!(matches!(
            build_payload(1, &bad),
            Err(CrmError::Validation(_))
        ));
    }
}
