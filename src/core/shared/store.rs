//! Store seams for the backing database.
//!
//! Every read and write the CRM performs goes through one of these traits so
//! the operations can run against Postgres (`PgStore`) or the in-process
//! `MemoryStore`. Lookups that may legitimately find nothing return
//! `Ok(None)`; `Err` is reserved for genuine failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::models::{
    AuditEntry, Company, CompanyId, Followup, Invite, Lead, LeadChanges, Membership, MessageRow,
    NewLead, NewMembership, NewMessage, PurgeRequest,
};
use crate::core::shared::utils::DbPool;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("query error: {0}")]
    Query(String),
}

/// Result of an insert that tolerates an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    AlreadyExisted,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_by_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
    ) -> Result<Option<Lead>, StoreError>;

    /// Most recently created first.
    async fn list(&self, company_id: CompanyId, limit: i64) -> Result<Vec<Lead>, StoreError>;

    /// Fails with `UniqueViolation` when (company, phone) is taken.
    async fn insert(&self, lead: NewLead) -> Result<Lead, StoreError>;

    async fn update(
        &self,
        company_id: CompanyId,
        phone: &str,
        changes: LeadChanges,
    ) -> Result<Option<Lead>, StoreError>;

    /// Removes the company's leads for `phone` created at or before `before`.
    async fn delete_by_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Newest first, capped at `limit`.
    async fn recent(&self, company_id: CompanyId, limit: i64)
        -> Result<Vec<MessageRow>, StoreError>;

    /// Newest first, only rows created at or after `since`.
    async fn since(
        &self,
        company_id: CompanyId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError>;

    /// Oldest first.
    async fn for_session(
        &self,
        company_id: CompanyId,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError>;

    async fn append(&self, message: NewMessage) -> Result<MessageRow, StoreError>;

    /// Removes the session's messages created at or before `before`.
    async fn delete_session(
        &self,
        company_id: CompanyId,
        session_id: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait ResolutionStore: Send + Sync {
    async fn insert_if_absent(
        &self,
        company_id: CompanyId,
        session_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError>;
}

#[async_trait]
pub trait FollowupStore: Send + Sync {
    async fn get(&self, company_id: CompanyId, id: i64) -> Result<Option<Followup>, StoreError>;

    async fn list_for_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
    ) -> Result<Vec<Followup>, StoreError>;

    /// Persists status, error detail, sent_at and updated_at.
    async fn save_status(&self, followup: &Followup) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn company(&self, id: CompanyId) -> Result<Option<Company>, StoreError>;

    async fn membership(
        &self,
        user_id: Uuid,
        company_id: CompanyId,
    ) -> Result<Option<Membership>, StoreError>;

    async fn invite(&self, id: Uuid) -> Result<Option<Invite>, StoreError>;

    async fn invite_by_token(&self, token: &str) -> Result<Option<Invite>, StoreError>;

    /// Marks a pending, unused invite as used and inserts the membership in one
    /// step. Returns `None` when the invite was no longer usable.
    async fn accept_invite(
        &self,
        invite_id: Uuid,
        membership: NewMembership,
        at: DateTime<Utc>,
    ) -> Result<Option<Membership>, StoreError>;

    /// Flips a pending invite to revoked. Returns false if it was not pending.
    async fn revoke_invite(&self, invite_id: Uuid) -> Result<bool, StoreError>;

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PurgeStore: Send + Sync {
    async fn record(&self, request: PurgeRequest) -> Result<(), StoreError>;

    async fn complete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Closes every open request for (company, phone) raised at or before
    /// `covered_until`. Returns how many were closed.
    async fn complete_covered(
        &self,
        company_id: CompanyId,
        phone: &str,
        covered_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Incomplete requests raised before `cutoff`, oldest first.
    async fn stale(&self, cutoff: DateTime<Utc>, limit: i64)
        -> Result<Vec<PurgeRequest>, StoreError>;
}

#[derive(Clone)]
pub struct Stores {
    pub leads: Arc<dyn LeadStore>,
    pub messages: Arc<dyn MessageStore>,
    pub resolutions: Arc<dyn ResolutionStore>,
    pub followups: Arc<dyn FollowupStore>,
    pub directory: Arc<dyn DirectoryStore>,
    pub purges: Arc<dyn PurgeStore>,
}

impl Stores {
    pub fn postgres(pool: DbPool) -> Self {
        let store = Arc::new(crate::core::shared::pg_store::PgStore::new(pool));
        Self {
            leads: store.clone(),
            messages: store.clone(),
            resolutions: store.clone(),
            followups: store.clone(),
            directory: store.clone(),
            purges: store,
        }
    }

    pub fn memory(store: Arc<crate::core::shared::memory_store::MemoryStore>) -> Self {
        Self {
            leads: store.clone(),
            messages: store.clone(),
            resolutions: store.clone(),
            followups: store.clone(),
            directory: store.clone(),
            purges: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
