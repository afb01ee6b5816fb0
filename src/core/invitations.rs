//! Single-use company invites: preview by token, accept as the invited
//! email, revoke while still pending.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::permissions::{authorize, scopes, Caller};
use crate::core::realtime::{ChangeEvent, ChangeKind};
use crate::core::shared::error::{CrmError, CrmResult};
use crate::core::shared::models::{AuditEntry, CompanyId, Invite, NewMembership};
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
}

impl std::str::FromStr for InvitationStatus {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "revoked" => Ok(Self::Revoked),
            other => Err(CrmError::Internal(format!("unknown invite status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitePreview {
    pub email: String,
    pub company_name: String,
    pub valid: bool,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptInviteResponse {
    pub success: bool,
    pub company_id: CompanyId,
    pub company_name: String,
    pub role: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeInviteResponse {
    pub success: bool,
    pub invite_id: Uuid,
}

/// Why an invite can no longer be used, if it can't.
pub fn unusable_reason(invite: &Invite, now: DateTime<Utc>) -> Option<&'static str> {
    match invite.status.parse::<InvitationStatus>() {
        Ok(InvitationStatus::Revoked) => Some("invite was revoked"),
        Ok(InvitationStatus::Accepted) => Some("invite was already used"),
        Err(_) => Some("invite is in an unknown state"),
        Ok(InvitationStatus::Pending) if invite.used => Some("invite was already used"),
        Ok(InvitationStatus::Pending) if invite.expires_at <= now => Some("invite has expired"),
        Ok(InvitationStatus::Pending) => None,
    }
}

pub struct InvitationService {
    state: Arc<AppState>,
}

impl InvitationService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    async fn find_by_token(&self, token: &str) -> CrmResult<Invite> {
        self.state
            .stores
            .directory
            .invite_by_token(token)
            .await?
            .ok_or_else(|| CrmError::NotFound("invite".into()))
    }

    async fn company_name(&self, company_id: CompanyId) -> CrmResult<String> {
        Ok(self
            .state
            .stores
            .directory
            .company(company_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_default())
    }

    /// Known tokens always preview, with `valid` telling whether they can
    /// still be accepted.
    pub async fn preview(&self, token: &str, now: DateTime<Utc>) -> CrmResult<InvitePreview> {
        let invite = self.find_by_token(token).await?;
        Ok(InvitePreview {
            company_name: self.company_name(invite.company_id).await?,
            valid: unusable_reason(&invite, now).is_none(),
            email: invite.email,
            token: invite.token,
        })
    }

    pub async fn accept(
        &self,
        token: &str,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> CrmResult<AcceptInviteResponse> {
        let invite = self.find_by_token(token).await?;
        if let Some(reason) = unusable_reason(&invite, now) {
            return Err(CrmError::InvalidInvite(reason.into()));
        }

        let matches_email = caller
            .email
            .as_deref()
            .map(|email| email.eq_ignore_ascii_case(invite.email.trim()))
            .unwrap_or(false);
        if !matches_email {
            return Err(CrmError::Forbidden(
                "invite was issued to a different email".into(),
            ));
        }

        let membership = NewMembership {
            id: Uuid::new_v4(),
            user_id: caller.user_id,
            company_id: invite.company_id,
            email: invite.email.clone(),
            role: invite.role.clone(),
            scopes: Vec::new(),
            active: true,
            created_at: now,
        };
        let accepted = self
            .state
            .stores
            .directory
            .accept_invite(invite.id, membership, now)
            .await?
            .ok_or_else(|| CrmError::InvalidInvite("invite is no longer usable".into()))?;

        log::info!(
            "User {} joined company {} as {}",
            caller.user_id,
            accepted.company_id,
            accepted.role
        );
        self.state.changes.publish(ChangeEvent::new(
            accepted.company_id,
            ChangeKind::MembershipChanged,
            caller.user_id.to_string(),
        ));

        Ok(AcceptInviteResponse {
            success: true,
            company_id: accepted.company_id,
            company_name: self.company_name(accepted.company_id).await?,
            role: accepted.role,
            message: "Successfully joined the company".into(),
        })
    }

    pub async fn revoke(
        &self,
        company_id: CompanyId,
        invite_id: Uuid,
        actor: Uuid,
    ) -> CrmResult<RevokeInviteResponse> {
        let invite = self
            .state
            .stores
            .directory
            .invite(invite_id)
            .await?
            .filter(|i| i.company_id == company_id)
            .ok_or_else(|| CrmError::NotFound(format!("invite {}", invite_id)))?;

        if !self.state.stores.directory.revoke_invite(invite.id).await? {
            return Err(CrmError::InvalidInvite(
                "only pending invites can be revoked".into(),
            ));
        }

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            company_id,
            actor_id: Some(actor),
            action: "invite.revoked".into(),
            target: invite.email.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.state.stores.directory.append_audit(entry).await {
            log::warn!("Failed to audit revoke of invite {}: {}", invite_id, e);
        }
        self.state.changes.publish(ChangeEvent::new(
            company_id,
            ChangeKind::MembershipChanged,
            invite.email,
        ));

        Ok(RevokeInviteResponse {
            success: true,
            invite_id,
        })
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/invites/:token", get(preview_invite))
        .route("/api/invites/:token/accept", post(accept_invite))
        .route(
            "/api/companies/:company/invites/:id/revoke",
            post(revoke_invite),
        )
}

async fn preview_invite(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> CrmResult<Json<InvitePreview>> {
    let service = InvitationService::new(state);
    Ok(Json(service.preview(&token, Utc::now()).await?))
}

async fn accept_invite(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    caller: Caller,
) -> CrmResult<Json<AcceptInviteResponse>> {
    let service = InvitationService::new(state);
    Ok(Json(service.accept(&token, &caller, Utc::now()).await?))
}

async fn revoke_invite(
    State(state): State<Arc<AppState>>,
    Path((company_id, invite_id)): Path<(CompanyId, Uuid)>,
    caller: Caller,
) -> CrmResult<Json<RevokeInviteResponse>> {
    let access = authorize(&state, &caller, company_id, &[scopes::TEAM_MANAGE]).await?;
    let service = InvitationService::new(state);
    Ok(Json(
        service
            .revoke(company_id, invite_id, access.user_id())
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::TestAppStateBuilder;
    use chrono::Duration;

    fn invite(company_id: CompanyId, token: &str, expires_in: Duration) -> Invite {
        let now = Utc::now();
        Invite {
            id: Uuid::new_v4(),
            company_id,
            email: "ana@clinica.test".into(),
            role: "agent".into(),
            token: token.into(),
            status: "pending".into(),
            used: false,
            expires_at: now + expires_in,
            used_at: None,
            created_at: now,
        }
    }

    fn caller(email: &str) -> Caller {
        Caller {
            user_id: Uuid::new_v4(),
            email: Some(email.into()),
        }
    }

    #[tokio::test]
    async fn test_preview_known_and_unknown() {
        let harness = TestAppStateBuilder::new().build();
        harness.store.seed_company(3, "Clínica Sorriso").await;
        harness
            .store
            .seed_invite(invite(3, "tok-expired", Duration::hours(-1)))
            .await;
        let service = InvitationService::new(harness.state.clone());

        let preview = service.preview("tok-expired", Utc::now()).await.unwrap();
        assert!(!preview.valid);
        assert_eq!(preview.company_name, "Clínica Sorriso");

        let missing = service.preview("nope", Utc::now()).await;
        assert!(matches!(missing, Err(CrmError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_accept_is_single_use() {
        let harness = TestAppStateBuilder::new().build();
        harness.store.seed_company(3, "Clínica Sorriso").await;
        harness
            .store
            .seed_invite(invite(3, "tok-1", Duration::days(2)))
            .await;
        let service = InvitationService::new(harness.state.clone());
        let ana = caller("Ana@Clinica.test");

        let accepted = service.accept("tok-1", &ana, Utc::now()).await.unwrap();
        assert_eq!(accepted.company_id, 3);
        assert_eq!(accepted.role, "agent");

        let access = authorize(&harness.state, &ana, 3, &[scopes::WHATSAPP_READ]).await;
        assert!(access.is_ok());

        let again = service.accept("tok-1", &ana, Utc::now()).await;
        assert!(matches!(again, Err(CrmError::InvalidInvite(_))));
    }

    #[tokio::test]
    async fn test_accept_rejects_other_email_and_expired() {
        let harness = TestAppStateBuilder::new().build();
        harness
            .store
            .seed_invite(invite(3, "tok-2", Duration::days(2)))
            .await;
        harness
            .store
            .seed_invite(invite(3, "tok-old", Duration::seconds(-5)))
            .await;
        let service = InvitationService::new(harness.state.clone());

        let other = service
            .accept("tok-2", &caller("bob@clinica.test"), Utc::now())
            .await;
        assert!(matches!(other, Err(CrmError::Forbidden(_))));

        let expired = service
            .accept("tok-old", &caller("ana@clinica.test"), Utc::now())
            .await;
        assert!(matches!(expired, Err(CrmError::InvalidInvite(_))));
    }

    #[tokio::test]
    async fn test_revoke_only_pending_and_audited() {
        let harness = TestAppStateBuilder::new().build();
        let pending = invite(3, "tok-3", Duration::days(1));
        let invite_id = pending.id;
        harness.store.seed_invite(pending).await;
        let service = InvitationService::new(harness.state.clone());
        let admin = Uuid::new_v4();

        service.revoke(3, invite_id, admin).await.unwrap();
        let audit = harness.store.audit_entries(3).await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "invite.revoked");

        let twice = service.revoke(3, invite_id, admin).await;
        assert!(matches!(twice, Err(CrmError::InvalidInvite(_))));

        let wrong_company = service.revoke(4, invite_id, admin).await;
        assert!(matches!(wrong_company, Err(CrmError::NotFound(_))));

        let preview = service.preview("tok-3", Utc::now()).await.unwrap();
        assert!(!preview.valid);
    }
}
