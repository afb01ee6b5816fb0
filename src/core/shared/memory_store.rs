//! In-process store used by tests and by the server when no database URL is
//! configured. Mirrors the uniqueness and ordering guarantees of the Postgres
//! schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::shared::models::{
    AuditEntry, Company, CompanyId, Followup, Invite, Lead, LeadChanges, Membership, MessageRow,
    NewLead, NewMembership, NewMessage, PurgeRequest,
};
use crate::core::shared::store::{
    DirectoryStore, FollowupStore, InsertOutcome, LeadStore, MessageStore, PurgeStore,
    ResolutionStore, StoreError,
};

#[derive(Default)]
struct Tables {
    next_lead_id: i64,
    next_message_id: i64,
    next_followup_id: i64,
    companies: HashMap<CompanyId, Company>,
    leads: Vec<Lead>,
    messages: Vec<MessageRow>,
    resolved: HashSet<(CompanyId, String)>,
    followups: Vec<Followup>,
    memberships: Vec<Membership>,
    invites: HashMap<Uuid, Invite>,
    audit: Vec<AuditEntry>,
    purges: Vec<PurgeRequest>,
    injected_failures: Vec<String>,
}

impl Tables {
    fn take_failure(&mut self, operation: &str) -> Result<(), StoreError> {
        if let Some(pos) = self.injected_failures.iter().position(|op| op == operation) {
            self.injected_failures.remove(pos);
            return Err(StoreError::Query(format!("injected failure in {operation}")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `operation` (e.g. `"messages.delete_session"`) fail.
    pub async fn fail_next(&self, operation: &str) {
        self.tables
            .write()
            .await
            .injected_failures
            .push(operation.to_string());
    }

    pub async fn seed_company(&self, id: CompanyId, name: &str) -> Company {
        let company = Company {
            id,
            name: name.to_string(),
            active: true,
            plan: "free".to_string(),
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .companies
            .insert(id, company.clone());
        company
    }

    pub async fn seed_membership(&self, membership: NewMembership) -> Membership {
        let row = membership_from(membership);
        let mut tables = self.tables.write().await;
        tables
            .memberships
            .retain(|m| !(m.user_id == row.user_id && m.company_id == row.company_id));
        tables.memberships.push(row.clone());
        row
    }

    pub async fn seed_invite(&self, invite: Invite) {
        self.tables.write().await.invites.insert(invite.id, invite);
    }

    pub async fn seed_followup(&self, mut followup: Followup) -> Followup {
        let mut tables = self.tables.write().await;
        tables.next_followup_id += 1;
        followup.id = tables.next_followup_id;
        tables.followups.push(followup.clone());
        followup
    }

    pub async fn lead_count(&self, company_id: CompanyId, phone: &str) -> usize {
        let tables = self.tables.read().await;
        tables
            .leads
            .iter()
            .filter(|l| l.company_id == company_id && l.phone == phone)
            .count()
    }

    pub async fn message_count(&self, company_id: CompanyId, session_id: &str) -> usize {
        let tables = self.tables.read().await;
        tables
            .messages
            .iter()
            .filter(|m| m.company_id == company_id && m.session_id.as_deref() == Some(session_id))
            .count()
    }

    pub async fn resolved_count(&self, company_id: CompanyId) -> usize {
        let tables = self.tables.read().await;
        tables
            .resolved
            .iter()
            .filter(|(company, _)| *company == company_id)
            .count()
    }

    pub async fn audit_entries(&self, company_id: CompanyId) -> Vec<AuditEntry> {
        let tables = self.tables.read().await;
        tables
            .audit
            .iter()
            .filter(|e| e.company_id == company_id)
            .cloned()
            .collect()
    }

    pub async fn purge_requests(&self) -> Vec<PurgeRequest> {
        self.tables.read().await.purges.clone()
    }
}

fn membership_from(membership: NewMembership) -> Membership {
    Membership {
        id: membership.id,
        user_id: membership.user_id,
        company_id: membership.company_id,
        email: membership.email,
        role: membership.role,
        scopes: membership.scopes,
        active: membership.active,
        created_at: membership.created_at,
    }
}

fn newest_first(rows: &mut [MessageRow]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn find_by_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
    ) -> Result<Option<Lead>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("leads.find_by_phone")?;
        Ok(tables
            .leads
            .iter()
            .find(|l| l.company_id == company_id && l.phone == phone)
            .cloned())
    }

    async fn list(&self, company_id: CompanyId, limit: i64) -> Result<Vec<Lead>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("leads.list")?;
        let mut rows: Vec<Lead> = tables
            .leads
            .iter()
            .filter(|l| l.company_id == company_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn insert(&self, lead: NewLead) -> Result<Lead, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("leads.insert")?;
        if tables
            .leads
            .iter()
            .any(|l| l.company_id == lead.company_id && l.phone == lead.phone)
        {
            return Err(StoreError::UniqueViolation);
        }

        tables.next_lead_id += 1;
        let now = Utc::now();
        let row = Lead {
            id: tables.next_lead_id,
            company_id: lead.company_id,
            name: lead.name,
            phone: lead.phone,
            stage: lead.stage,
            qualification: lead.qualification,
            tags: lead.tags,
            origin: lead.origin,
            board_column_id: None,
            board_position: None,
            created_at: now,
            updated_at: now,
        };
        tables.leads.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        company_id: CompanyId,
        phone: &str,
        changes: LeadChanges,
    ) -> Result<Option<Lead>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("leads.update")?;
        let Some(lead) = tables
            .leads
            .iter_mut()
            .find(|l| l.company_id == company_id && l.phone == phone)
        else {
            return Ok(None);
        };

        if let Some(name) = changes.name {
            lead.name = name;
        }
        if let Some(stage) = changes.stage {
            lead.stage = Some(stage);
        }
        if let Some(qualification) = changes.qualification {
            lead.qualification = Some(qualification);
        }
        if let Some(tags) = changes.tags {
            lead.tags = tags;
        }
        if let Some(column) = changes.board_column_id {
            lead.board_column_id = Some(column);
        }
        if let Some(position) = changes.board_position {
            lead.board_position = Some(position);
        }
        lead.updated_at = changes.updated_at;
        Ok(Some(lead.clone()))
    }

    async fn delete_by_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("leads.delete_by_phone")?;
        let count = tables.leads.len();
        tables.leads.retain(|l| {
            !(l.company_id == company_id && l.phone == phone && l.created_at <= before)
        });
        Ok(count - tables.leads.len())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn recent(
        &self,
        company_id: CompanyId,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("messages.recent")?;
        let mut rows: Vec<MessageRow> = tables
            .messages
            .iter()
            .filter(|m| m.company_id == company_id)
            .cloned()
            .collect();
        newest_first(&mut rows);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn since(
        &self,
        company_id: CompanyId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("messages.since")?;
        let mut rows: Vec<MessageRow> = tables
            .messages
            .iter()
            .filter(|m| m.company_id == company_id && m.created_at >= since)
            .cloned()
            .collect();
        newest_first(&mut rows);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn for_session(
        &self,
        company_id: CompanyId,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("messages.for_session")?;
        let mut rows: Vec<MessageRow> = tables
            .messages
            .iter()
            .filter(|m| m.company_id == company_id && m.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn append(&self, message: NewMessage) -> Result<MessageRow, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("messages.append")?;
        tables.next_message_id += 1;
        let row = MessageRow {
            id: tables.next_message_id,
            company_id: message.company_id,
            session_id: message.session_id,
            message: message.message,
            created_at: message.created_at,
        };
        tables.messages.push(row.clone());
        Ok(row)
    }

    async fn delete_session(
        &self,
        company_id: CompanyId,
        session_id: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("messages.delete_session")?;
        let count = tables.messages.len();
        tables.messages.retain(|m| {
            !(m.company_id == company_id
                && m.session_id.as_deref() == Some(session_id)
                && m.created_at <= before)
        });
        Ok(count - tables.messages.len())
    }
}

#[async_trait]
impl ResolutionStore for MemoryStore {
    async fn insert_if_absent(
        &self,
        company_id: CompanyId,
        session_id: &str,
        _resolved_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("resolutions.insert_if_absent")?;
        if tables.resolved.insert((company_id, session_id.to_string())) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExisted)
        }
    }
}

#[async_trait]
impl FollowupStore for MemoryStore {
    async fn get(&self, company_id: CompanyId, id: i64) -> Result<Option<Followup>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .followups
            .iter()
            .find(|f| f.company_id == company_id && f.id == id)
            .cloned())
    }

    async fn list_for_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
    ) -> Result<Vec<Followup>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Followup> = tables
            .followups
            .iter()
            .filter(|f| f.company_id == company_id && f.phone == phone)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.scheduled_for.cmp(&a.scheduled_for));
        Ok(rows)
    }

    async fn save_status(&self, followup: &Followup) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("followups.save_status")?;
        let row = tables
            .followups
            .iter_mut()
            .find(|f| f.id == followup.id)
            .ok_or(StoreError::NotFound)?;
        row.status = followup.status.clone();
        row.error_detail = followup.error_detail.clone();
        row.sent_at = followup.sent_at;
        row.updated_at = followup.updated_at;
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn company(&self, id: CompanyId) -> Result<Option<Company>, StoreError> {
        Ok(self.tables.read().await.companies.get(&id).cloned())
    }

    async fn membership(
        &self,
        user_id: Uuid,
        company_id: CompanyId,
    ) -> Result<Option<Membership>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("directory.membership")?;
        Ok(tables
            .memberships
            .iter()
            .find(|m| m.user_id == user_id && m.company_id == company_id)
            .cloned())
    }

    async fn invite(&self, id: Uuid) -> Result<Option<Invite>, StoreError> {
        Ok(self.tables.read().await.invites.get(&id).cloned())
    }

    async fn invite_by_token(&self, token: &str) -> Result<Option<Invite>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.invites.values().find(|i| i.token == token).cloned())
    }

    async fn accept_invite(
        &self,
        invite_id: Uuid,
        membership: NewMembership,
        at: DateTime<Utc>,
    ) -> Result<Option<Membership>, StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("directory.accept_invite")?;
        let Some(invite) = tables.invites.get_mut(&invite_id) else {
            return Ok(None);
        };
        if invite.used || invite.status != "pending" || invite.expires_at <= at {
            return Ok(None);
        }
        invite.used = true;
        invite.status = "accepted".to_string();
        invite.used_at = Some(at);

        let row = membership_from(membership);
        tables
            .memberships
            .retain(|m| !(m.user_id == row.user_id && m.company_id == row.company_id));
        tables.memberships.push(row.clone());
        Ok(Some(row))
    }

    async fn revoke_invite(&self, invite_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.invites.get_mut(&invite_id) {
            Some(invite) if invite.status == "pending" => {
                invite.status = "revoked".to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.tables.write().await.audit.push(entry);
        Ok(())
    }
}

#[async_trait]
impl PurgeStore for MemoryStore {
    async fn record(&self, request: PurgeRequest) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.take_failure("purges.record")?;
        tables.purges.push(request);
        Ok(())
    }

    async fn complete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(request) = tables.purges.iter_mut().find(|p| p.id == id) {
            request.completed_at = Some(at);
        }
        Ok(())
    }

    async fn complete_covered(
        &self,
        company_id: CompanyId,
        phone: &str,
        covered_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let mut closed = 0;
        for request in tables.purges.iter_mut().filter(|p| {
            p.completed_at.is_none()
                && p.company_id == company_id
                && p.phone == phone
                && p.requested_at <= covered_until
        }) {
            request.completed_at = Some(at);
            closed += 1;
        }
        Ok(closed)
    }

    async fn stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PurgeRequest>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<PurgeRequest> = tables
            .purges
            .iter()
            .filter(|p| p.completed_at.is_none() && p.requested_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}
