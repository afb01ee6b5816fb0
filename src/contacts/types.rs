use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::shared::models::{CompanyId, Lead};

pub const WHATSAPP_ORIGIN: &str = "whatsapp";

#[derive(Debug, Clone, Deserialize)]
pub struct AddContactRequest {
    pub name: String,
    pub phone: String,
    pub qualification: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListLeadsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStageRequest {
    pub stage: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveOnBoardRequest {
    pub column_id: i64,
    pub position: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteLeadRequest {
    pub phone_number: String,
    pub empresa_id: CompanyId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteLeadResponse {
    pub success: bool,
    pub message: String,
    pub phone_number: String,
    pub leads_deleted: usize,
    pub messages_deleted: usize,
}

/// Lead as returned by the API, with the stage already normalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadView {
    pub id: i64,
    pub company_id: CompanyId,
    pub name: String,
    pub phone: String,
    pub stage: i32,
    pub stage_label: String,
    pub qualification: Option<String>,
    pub tags: Vec<String>,
    pub origin: String,
    pub board_column_id: Option<i64>,
    pub board_position: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Lead> for LeadView {
    fn from(lead: Lead) -> Self {
        let stage = lead.stage();
        Self {
            id: lead.id,
            company_id: lead.company_id,
            name: lead.name,
            phone: lead.phone,
            stage: stage.ordinal(),
            stage_label: stage.label().to_string(),
            qualification: lead.qualification,
            tags: lead.tags,
            origin: lead.origin,
            board_column_id: lead.board_column_id,
            board_position: lead.board_position,
            created_at: lead.created_at,
            updated_at: lead.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadListResponse {
    pub leads: Vec<LeadView>,
    pub total: usize,
    pub truncated: bool,
}
