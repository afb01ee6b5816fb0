use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use super::types::*;
use crate::core::permissions::Access;
use crate::core::realtime::{ChangeEvent, ChangeKind};
use crate::core::shared::error::{CrmError, CrmResult};
use crate::core::shared::models::{CompanyId, Lead, LeadChanges, NewLead, PurgeRequest, Stage};
use crate::core::shared::state::AppState;
use crate::core::shared::store::{StoreError, Stores};
use crate::core::shared::utils::normalize_phone;

const MAX_NAME_LEN: usize = 120;
const MAX_TAG_LEN: usize = 40;

pub struct ContactsService {
    state: Arc<AppState>,
}

/// Rows removed by one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub leads: usize,
    pub messages: usize,
}

/// Deletes the lead row and the messages of its session that existed at
/// `before`. Rows written later belong to a new conversation. Safe to repeat.
pub async fn purge_rows(
    stores: &Stores,
    company_id: CompanyId,
    phone: &str,
    before: DateTime<Utc>,
) -> Result<PurgeCounts, StoreError> {
    let leads = stores.leads.delete_by_phone(company_id, phone, before).await?;
    let messages = stores
        .messages
        .delete_session(company_id, phone, before)
        .await?;
    Ok(PurgeCounts { leads, messages })
}

pub fn validate_name(raw: &str) -> CrmResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CrmError::Validation("name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CrmError::Validation(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Trims, drops blanks and removes duplicates while keeping first-seen order.
pub fn clean_tags<I, S>(tags: I) -> CrmResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cleaned: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(CrmError::Validation(format!("tag too long: {}", tag)));
        }
        if !cleaned.iter().any(|t| t == tag) {
            cleaned.push(tag.to_string());
        }
    }
    Ok(cleaned)
}

impl ContactsService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn stores(&self) -> &Stores {
        &self.state.stores
    }

    fn publish(&self, company_id: CompanyId, kind: ChangeKind, phone: &str) {
        self.state
            .changes
            .publish(ChangeEvent::new(company_id, kind, phone));
    }

    pub async fn list(
        &self,
        company_id: CompanyId,
        query: ListLeadsQuery,
    ) -> CrmResult<LeadListResponse> {
        let cap = self.state.config.limits.lead_snapshot;
        let limit = query.limit.unwrap_or(cap).clamp(1, cap.max(1));
        let leads = self.stores().leads.list(company_id, limit).await?;
        let total = leads.len();
        Ok(LeadListResponse {
            truncated: total as i64 >= limit,
            leads: leads.into_iter().map(LeadView::from).collect(),
            total,
        })
    }

    pub async fn get(&self, company_id: CompanyId, raw_phone: &str) -> CrmResult<Lead> {
        let phone = normalize_phone(raw_phone)?;
        self.stores()
            .leads
            .find_by_phone(company_id, &phone)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("lead {}", phone)))
    }

    pub async fn add_contact(
        &self,
        company_id: CompanyId,
        request: AddContactRequest,
    ) -> CrmResult<Lead> {
        let name = validate_name(&request.name)?;
        let phone = normalize_phone(&request.phone)?;
        let mut tags = clean_tags(&request.tags)?;
        if !tags.iter().any(|t| t == WHATSAPP_ORIGIN) {
            tags.push(WHATSAPP_ORIGIN.to_string());
        }

        if self
            .stores()
            .leads
            .find_by_phone(company_id, &phone)
            .await?
            .is_some()
        {
            return Err(duplicate(&phone));
        }

        let lead = self
            .stores()
            .leads
            .insert(NewLead {
                company_id,
                name,
                phone: phone.clone(),
                stage: Some(Stage::New.ordinal()),
                qualification: request
                    .qualification
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty()),
                tags,
                origin: WHATSAPP_ORIGIN.to_string(),
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation => duplicate(&phone),
                other => CrmError::Store(other),
            })?;

        info!("Lead {} added to company {}", phone, company_id);
        self.publish(company_id, ChangeKind::LeadCreated, &phone);
        Ok(lead)
    }

    pub async fn update_stage(
        &self,
        company_id: CompanyId,
        raw_phone: &str,
        stage: i32,
    ) -> CrmResult<Lead> {
        let stage = Stage::try_from_ordinal(stage)
            .ok_or_else(|| CrmError::Validation(format!("stage must be 1-4, got {}", stage)))?;
        let mut changes = LeadChanges::at(Utc::now());
        changes.stage = Some(stage.ordinal());
        self.apply(company_id, raw_phone, changes).await
    }

    pub async fn update_tags(
        &self,
        company_id: CompanyId,
        raw_phone: &str,
        tags: Vec<String>,
    ) -> CrmResult<Lead> {
        let mut changes = LeadChanges::at(Utc::now());
        changes.tags = Some(clean_tags(tags)?);
        self.apply(company_id, raw_phone, changes).await
    }

    pub async fn move_on_board(
        &self,
        company_id: CompanyId,
        raw_phone: &str,
        request: MoveOnBoardRequest,
    ) -> CrmResult<Lead> {
        if request.column_id <= 0 || request.position < 0 {
            return Err(CrmError::Validation(
                "column_id must be positive and position non-negative".into(),
            ));
        }
        let mut changes = LeadChanges::at(Utc::now());
        changes.board_column_id = Some(request.column_id);
        changes.board_position = Some(request.position);
        self.apply(company_id, raw_phone, changes).await
    }

    async fn apply(
        &self,
        company_id: CompanyId,
        raw_phone: &str,
        changes: LeadChanges,
    ) -> CrmResult<Lead> {
        let phone = normalize_phone(raw_phone)?;
        let lead = self
            .stores()
            .leads
            .update(company_id, &phone, changes)
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("lead {}", phone)))?;
        self.publish(company_id, ChangeKind::LeadUpdated, &phone);
        Ok(lead)
    }

    /// Removes the lead and its whole conversation. A purge request is written
    /// first so a failure between the two deletes is finished by the
    /// maintenance sweep.
    pub async fn delete_with_conversations(
        &self,
        access: &Access,
        company_id: CompanyId,
        raw_phone: &str,
    ) -> CrmResult<DeleteLeadResponse> {
        access.ensure_company(company_id)?;
        let phone = normalize_phone(raw_phone)?;

        let requested_at = Utc::now();
        let request = PurgeRequest {
            id: Uuid::new_v4(),
            company_id,
            phone: phone.clone(),
            requested_at,
            completed_at: None,
        };
        let request_id = request.id;
        self.stores().purges.record(request).await?;

        let counts = purge_rows(self.stores(), company_id, &phone, requested_at)
            .await
            .map_err(|e| {
                warn!(
                    "Partial delete of lead {} in company {}: {}; purge {} left for retry",
                    phone, company_id, e, request_id
                );
                CrmError::Internal(format!(
                    "delete of {} did not complete ({}); retry is safe",
                    phone, e
                ))
            })?;

        // Earlier failed attempts for this phone are covered by this pass too.
        if let Err(e) = self
            .stores()
            .purges
            .complete_covered(company_id, &phone, requested_at, Utc::now())
            .await
        {
            warn!("Failed to mark purge {} complete: {}", request_id, e);
        }

        info!(
            "User {} deleted lead {} in company {} ({} lead rows, {} messages)",
            access.user_id(),
            phone,
            company_id,
            counts.leads,
            counts.messages
        );
        self.publish(company_id, ChangeKind::LeadDeleted, &phone);

        Ok(DeleteLeadResponse {
            success: true,
            message: "Lead and conversations deleted".to_string(),
            phone_number: phone,
            leads_deleted: counts.leads,
            messages_deleted: counts.messages,
        })
    }
}

fn duplicate(phone: &str) -> CrmError {
    CrmError::Duplicate(format!("A contact with phone {} already exists", phone))
}
