//! Wire shapes of the outbound automation webhooks and serverless functions.
//! Field names follow what the automation side expects, so most are Portuguese.

use serde::{Deserialize, Serialize};

use crate::core::shared::models::CompanyId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyPayload {
    pub empresa_id: CompanyId,
    pub nome: String,
    pub numero: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSendPayload {
    pub empresa_id: CompanyId,
    pub nome: String,
    pub telefone: String,
    pub mensagem: String,
    pub remetente: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpsPayload {
    pub empresa_id: CompanyId,
    pub numero: String,
    pub nome: String,
    pub data_agendamento: String,
    pub hora_agendamento: String,
    pub servico: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadData {
    pub name: String,
    pub number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFollowupRequest {
    pub lead_id: Option<i64>,
    pub empresa_id: CompanyId,
    pub scheduled_date: String,
    pub message: String,
    pub lead_data: LeadData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleFollowupResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_envio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schedule_request_uses_camel_case() {
        let request = ScheduleFollowupRequest {
            lead_id: Some(7),
            empresa_id: 5,
            scheduled_date: "2030-01-01T10:00:00+00:00".into(),
            message: "Oi".into(),
            lead_data: LeadData {
                name: "Lead 5511".into(),
                number: "5511".into(),
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["leadId"], json!(7));
        assert_eq!(value["empresaId"], json!(5));
        assert_eq!(value["leadData"]["number"], json!("5511"));
        assert!(value.get("scheduledDate").is_some());
    }

    #[test]
    fn test_nps_omits_missing_email() {
        let payload = NpsPayload {
            empresa_id: 1,
            numero: "5511999990000".into(),
            nome: "Ana".into(),
            data_agendamento: "2030-01-01".into(),
            hora_agendamento: "10:00".into(),
            servico: "Consulta".into(),
            email: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("email").is_none());
    }

    #[test]
    fn test_followup_error_response_decodes() {
        let response: ScheduleFollowupResponse =
            serde_json::from_value(json!({"success": false, "error": "lead blocked"})).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("lead blocked"));
    }
}
