use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::shared::schema::{
    audit_log, companies, followups, invites, lead_purges, leads, memberships, messages,
};

pub type CompanyId = i64;

/// Funnel position of a lead. Storage keeps the raw ordinal; anything null or
/// outside 1..=4 reads as `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    New,
    Approached,
    Qualified,
    Closed,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::New, Stage::Approached, Stage::Qualified, Stage::Closed];

    pub fn try_from_ordinal(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::New),
            2 => Some(Self::Approached),
            3 => Some(Self::Qualified),
            4 => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn from_stored(value: Option<i32>) -> Self {
        value.and_then(Self::try_from_ordinal).unwrap_or(Self::New)
    }

    pub fn ordinal(self) -> i32 {
        match self {
            Self::New => 1,
            Self::Approached => 2,
            Self::Qualified => 3,
            Self::Closed => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Approached => "Approached",
            Self::Qualified => "Qualified",
            Self::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = companies)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub active: bool,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = leads)]
pub struct Lead {
    pub id: i64,
    pub company_id: CompanyId,
    pub name: String,
    pub phone: String,
    pub stage: Option<i32>,
    pub qualification: Option<String>,
    pub tags: Vec<String>,
    pub origin: String,
    pub board_column_id: Option<i64>,
    pub board_position: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn stage(&self) -> Stage {
        Stage::from_stored(self.stage)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = leads)]
pub struct NewLead {
    pub company_id: CompanyId,
    pub name: String,
    pub phone: String,
    pub stage: Option<i32>,
    pub qualification: Option<String>,
    pub tags: Vec<String>,
    pub origin: String,
}

/// Partial lead update. `None` fields are left untouched.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = leads)]
pub struct LeadChanges {
    pub name: Option<String>,
    pub stage: Option<i32>,
    pub qualification: Option<String>,
    pub tags: Option<Vec<String>>,
    pub board_column_id: Option<i64>,
    pub board_position: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl LeadChanges {
    pub fn at(updated_at: DateTime<Utc>) -> Self {
        Self {
            name: None,
            stage: None,
            qualification: None,
            tags: None,
            board_column_id: None,
            board_position: None,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: i64,
    pub company_id: CompanyId,
    pub session_id: Option<String>,
    pub message: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub company_id: CompanyId,
    pub session_id: Option<String>,
    pub message: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = followups)]
pub struct Followup {
    pub id: i64,
    pub company_id: CompanyId,
    pub lead_id: Option<i64>,
    pub phone: String,
    pub message: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: String,
    pub error_detail: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = memberships)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: CompanyId,
    pub email: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = memberships)]
pub struct NewMembership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: CompanyId,
    pub email: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = invites)]
pub struct Invite {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub email: String,
    pub role: String,
    pub token: String,
    pub status: String,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = audit_log)]
pub struct AuditEntry {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = lead_purges)]
pub struct PurgeRequest {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub phone: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_defaults_to_new() {
        assert_eq!(Stage::from_stored(None), Stage::New);
        assert_eq!(Stage::from_stored(Some(0)), Stage::New);
        assert_eq!(Stage::from_stored(Some(9)), Stage::New);
        assert_eq!(Stage::from_stored(Some(3)), Stage::Qualified);
    }

    #[test]
    fn test_stage_ordinals_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::try_from_ordinal(stage.ordinal()), Some(stage));
        }
    }
}
