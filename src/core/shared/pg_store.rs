use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use crate::core::shared::models::{
    AuditEntry, Company, CompanyId, Followup, Invite, Lead, LeadChanges, Membership, MessageRow,
    NewLead, NewMembership, NewMessage, PurgeRequest,
};
use crate::core::shared::schema::{
    audit_log, companies, followups, invites, lead_purges, leads, memberships, messages,
    resolved_conversations,
};
use crate::core::shared::store::{
    DirectoryStore, FollowupStore, InsertOutcome, LeadStore, MessageStore, PurgeStore,
    ResolutionStore, StoreError,
};
use crate::core::shared::utils::DbPool;

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                Self::UniqueViolation
            }
            DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
                Self::Connection(info.message().to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

/// Diesel-backed store. Queries run on the blocking pool so the async
/// handlers never hold a connection across an await point.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, DieselError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Connection(format!("Failed to get connection: {e}")))?;
            query(&mut conn).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Connection(format!("Blocking task failed: {e}")))?
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn find_by_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
    ) -> Result<Option<Lead>, StoreError> {
        let phone = phone.to_string();
        self.run(move |conn| {
            leads::table
                .filter(leads::company_id.eq(company_id))
                .filter(leads::phone.eq(phone))
                .select(Lead::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn list(&self, company_id: CompanyId, limit: i64) -> Result<Vec<Lead>, StoreError> {
        self.run(move |conn| {
            leads::table
                .filter(leads::company_id.eq(company_id))
                .order(leads::created_at.desc())
                .limit(limit)
                .select(Lead::as_select())
                .load(conn)
        })
        .await
    }

    async fn insert(&self, lead: NewLead) -> Result<Lead, StoreError> {
        self.run(move |conn| {
            diesel::insert_into(leads::table)
                .values(&lead)
                .returning(Lead::as_returning())
                .get_result(conn)
        })
        .await
    }

    async fn update(
        &self,
        company_id: CompanyId,
        phone: &str,
        changes: LeadChanges,
    ) -> Result<Option<Lead>, StoreError> {
        let phone = phone.to_string();
        self.run(move |conn| {
            diesel::update(
                leads::table
                    .filter(leads::company_id.eq(company_id))
                    .filter(leads::phone.eq(phone)),
            )
            .set(&changes)
            .returning(Lead::as_returning())
            .get_result(conn)
            .optional()
        })
        .await
    }

    async fn delete_by_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let phone = phone.to_string();
        self.run(move |conn| {
            diesel::delete(
                leads::table
                    .filter(leads::company_id.eq(company_id))
                    .filter(leads::phone.eq(phone))
                    .filter(leads::created_at.le(before)),
            )
            .execute(conn)
        })
        .await
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn recent(
        &self,
        company_id: CompanyId,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.run(move |conn| {
            messages::table
                .filter(messages::company_id.eq(company_id))
                .order(messages::created_at.desc())
                .limit(limit)
                .select(MessageRow::as_select())
                .load(conn)
        })
        .await
    }

    async fn since(
        &self,
        company_id: CompanyId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.run(move |conn| {
            messages::table
                .filter(messages::company_id.eq(company_id))
                .filter(messages::created_at.ge(since))
                .order(messages::created_at.desc())
                .limit(limit)
                .select(MessageRow::as_select())
                .load(conn)
        })
        .await
    }

    async fn for_session(
        &self,
        company_id: CompanyId,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let session_id = session_id.to_string();
        self.run(move |conn| {
            messages::table
                .filter(messages::company_id.eq(company_id))
                .filter(messages::session_id.eq(session_id))
                .order(messages::created_at.asc())
                .limit(limit)
                .select(MessageRow::as_select())
                .load(conn)
        })
        .await
    }

    async fn append(&self, message: NewMessage) -> Result<MessageRow, StoreError> {
        self.run(move |conn| {
            diesel::insert_into(messages::table)
                .values(&message)
                .returning(MessageRow::as_returning())
                .get_result(conn)
        })
        .await
    }

    async fn delete_session(
        &self,
        company_id: CompanyId,
        session_id: &str,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let session_id = session_id.to_string();
        self.run(move |conn| {
            diesel::delete(
                messages::table
                    .filter(messages::company_id.eq(company_id))
                    .filter(messages::session_id.eq(session_id))
                    .filter(messages::created_at.le(before)),
            )
            .execute(conn)
        })
        .await
    }
}

#[async_trait]
impl ResolutionStore for PgStore {
    async fn insert_if_absent(
        &self,
        company_id: CompanyId,
        session_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let session_id = session_id.to_string();
        let inserted = self
            .run(move |conn| {
                diesel::insert_into(resolved_conversations::table)
                    .values((
                        resolved_conversations::company_id.eq(company_id),
                        resolved_conversations::session_id.eq(session_id),
                        resolved_conversations::resolved_at.eq(resolved_at),
                    ))
                    .on_conflict((
                        resolved_conversations::company_id,
                        resolved_conversations::session_id,
                    ))
                    .do_nothing()
                    .execute(conn)
            })
            .await?;

        Ok(if inserted > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExisted
        })
    }
}

#[async_trait]
impl FollowupStore for PgStore {
    async fn get(&self, company_id: CompanyId, id: i64) -> Result<Option<Followup>, StoreError> {
        self.run(move |conn| {
            followups::table
                .filter(followups::company_id.eq(company_id))
                .filter(followups::id.eq(id))
                .select(Followup::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn list_for_phone(
        &self,
        company_id: CompanyId,
        phone: &str,
    ) -> Result<Vec<Followup>, StoreError> {
        let phone = phone.to_string();
        self.run(move |conn| {
            followups::table
                .filter(followups::company_id.eq(company_id))
                .filter(followups::phone.eq(phone))
                .order(followups::scheduled_for.desc())
                .select(Followup::as_select())
                .load(conn)
        })
        .await
    }

    async fn save_status(&self, followup: &Followup) -> Result<(), StoreError> {
        let followup = followup.clone();
        self.run(move |conn| {
            diesel::update(followups::table.filter(followups::id.eq(followup.id)))
                .set((
                    followups::status.eq(followup.status),
                    followups::error_detail.eq(followup.error_detail),
                    followups::sent_at.eq(followup.sent_at),
                    followups::updated_at.eq(followup.updated_at),
                ))
                .execute(conn)
                .map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl DirectoryStore for PgStore {
    async fn company(&self, id: CompanyId) -> Result<Option<Company>, StoreError> {
        self.run(move |conn| {
            companies::table
                .filter(companies::id.eq(id))
                .select(Company::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn membership(
        &self,
        user_id: Uuid,
        company_id: CompanyId,
    ) -> Result<Option<Membership>, StoreError> {
        self.run(move |conn| {
            memberships::table
                .filter(memberships::user_id.eq(user_id))
                .filter(memberships::company_id.eq(company_id))
                .select(Membership::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn invite(&self, id: Uuid) -> Result<Option<Invite>, StoreError> {
        self.run(move |conn| {
            invites::table
                .filter(invites::id.eq(id))
                .select(Invite::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn invite_by_token(&self, token: &str) -> Result<Option<Invite>, StoreError> {
        let token = token.to_string();
        self.run(move |conn| {
            invites::table
                .filter(invites::token.eq(token))
                .select(Invite::as_select())
                .first(conn)
                .optional()
        })
        .await
    }

    async fn accept_invite(
        &self,
        invite_id: Uuid,
        membership: NewMembership,
        at: DateTime<Utc>,
    ) -> Result<Option<Membership>, StoreError> {
        self.run(move |conn| {
            conn.transaction::<_, DieselError, _>(|conn| {
                let claimed = diesel::update(
                    invites::table
                        .filter(invites::id.eq(invite_id))
                        .filter(invites::used.eq(false))
                        .filter(invites::status.eq("pending"))
                        .filter(invites::expires_at.gt(at)),
                )
                .set((
                    invites::used.eq(true),
                    invites::status.eq("accepted"),
                    invites::used_at.eq(Some(at)),
                ))
                .execute(conn)?;

                if claimed == 0 {
                    return Ok(None);
                }

                diesel::insert_into(memberships::table)
                    .values(&membership)
                    .on_conflict((memberships::user_id, memberships::company_id))
                    .do_update()
                    .set((
                        memberships::role.eq(&membership.role),
                        memberships::scopes.eq(&membership.scopes),
                        memberships::active.eq(true),
                    ))
                    .returning(Membership::as_returning())
                    .get_result(conn)
                    .map(Some)
            })
        })
        .await
    }

    async fn revoke_invite(&self, invite_id: Uuid) -> Result<bool, StoreError> {
        let updated = self
            .run(move |conn| {
                diesel::update(
                    invites::table
                        .filter(invites::id.eq(invite_id))
                        .filter(invites::status.eq("pending")),
                )
                .set(invites::status.eq("revoked"))
                .execute(conn)
            })
            .await?;
        Ok(updated > 0)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.run(move |conn| {
            diesel::insert_into(audit_log::table)
                .values(&entry)
                .execute(conn)
                .map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl PurgeStore for PgStore {
    async fn record(&self, request: PurgeRequest) -> Result<(), StoreError> {
        self.run(move |conn| {
            diesel::insert_into(lead_purges::table)
                .values(&request)
                .execute(conn)
                .map(|_| ())
        })
        .await
    }

    async fn complete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.run(move |conn| {
            diesel::update(lead_purges::table.filter(lead_purges::id.eq(id)))
                .set(lead_purges::completed_at.eq(Some(at)))
                .execute(conn)
                .map(|_| ())
        })
        .await
    }

    async fn complete_covered(
        &self,
        company_id: CompanyId,
        phone: &str,
        covered_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let phone = phone.to_string();
        self.run(move |conn| {
            diesel::update(
                lead_purges::table
                    .filter(lead_purges::company_id.eq(company_id))
                    .filter(lead_purges::phone.eq(phone))
                    .filter(lead_purges::completed_at.is_null())
                    .filter(lead_purges::requested_at.le(covered_until)),
            )
            .set(lead_purges::completed_at.eq(Some(at)))
            .execute(conn)
        })
        .await
    }

    async fn stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PurgeRequest>, StoreError> {
        self.run(move |conn| {
            lead_purges::table
                .filter(lead_purges::completed_at.is_null())
                .filter(lead_purges::requested_at.lt(cutoff))
                .order(lead_purges::requested_at.asc())
                .limit(limit)
                .select(PurgeRequest::as_select())
                .load(conn)
        })
        .await
    }
}
