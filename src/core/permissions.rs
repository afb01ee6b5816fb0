//! Company-scoped permission evaluation.
//!
//! Identity is established upstream; requests arrive with `x-user-id` and
//! `x-user-email`. What a caller may do inside a company comes from their
//! membership row: super-admins get everything, admins get the fixed admin
//! list, everyone else gets their explicit scopes (or the agent preset when
//! none were assigned).

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use std::collections::HashSet;
use uuid::Uuid;

use crate::core::shared::error::{CrmError, CrmResult};
use crate::core::shared::models::{CompanyId, Membership};
use crate::core::shared::state::AppState;

pub mod scopes {
    pub const WILDCARD: &str = "*";
    pub const WHATSAPP_READ: &str = "whatsapp:read";
    pub const WHATSAPP_SEND: &str = "whatsapp:send";
    pub const LEADS_READ: &str = "leads:read";
    pub const LEADS_WRITE: &str = "leads:write";
    pub const LEADS_DELETE: &str = "leads:delete";
    pub const FOLLOWUPS_MANAGE: &str = "followups:manage";
    pub const DASHBOARD_READ: &str = "dashboard:read";
    pub const TEAM_MANAGE: &str = "team:manage";
    pub const SETTINGS_MANAGE: &str = "settings:manage";
}

pub const ADMIN_SCOPES: &[&str] = &[
    scopes::WHATSAPP_READ,
    scopes::WHATSAPP_SEND,
    scopes::LEADS_READ,
    scopes::LEADS_WRITE,
    scopes::LEADS_DELETE,
    scopes::FOLLOWUPS_MANAGE,
    scopes::DASHBOARD_READ,
    scopes::TEAM_MANAGE,
    scopes::SETTINGS_MANAGE,
];

pub const AGENT_SCOPES: &[&str] = &[
    scopes::WHATSAPP_READ,
    scopes::WHATSAPP_SEND,
    scopes::LEADS_READ,
    scopes::LEADS_WRITE,
    scopes::FOLLOWUPS_MANAGE,
    scopes::DASHBOARD_READ,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    SuperAdmin,
    Admin,
    Agent,
}

impl std::str::FromStr for MemberRole {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "super_admin" => Ok(Self::SuperAdmin),
            "admin" => Ok(Self::Admin),
            "agent" => Ok(Self::Agent),
            other => Err(CrmError::Validation(format!("unknown role: {}", other))),
        }
    }
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }
}

/// Authenticated caller, as forwarded by the auth gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = CrmError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CrmError::Unauthorized("missing x-user-id header".into()))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| CrmError::Unauthorized("invalid x-user-id header".into()))?;
        let email = parts
            .headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self { user_id, email })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeGrant {
    All,
    Scoped(HashSet<String>),
}

impl ScopeGrant {
    /// OR semantics: passes when any one of `required` is granted. An empty
    /// requirement always passes.
    pub fn allows_any(&self, required: &[&str]) -> bool {
        match self {
            Self::All => true,
            Self::Scoped(granted) => {
                required.is_empty()
                    || granted.contains(scopes::WILDCARD)
                    || required.iter().any(|scope| granted.contains(*scope))
            }
        }
    }

    fn from_list(list: &[&str]) -> Self {
        Self::Scoped(list.iter().map(|s| s.to_string()).collect())
    }
}

pub fn is_super_admin(
    caller_email: Option<&str>,
    membership: Option<&Membership>,
    super_admin_email: Option<&str>,
) -> bool {
    let by_email = matches!(
        (caller_email, super_admin_email),
        (Some(caller), Some(configured)) if !configured.is_empty() && caller == configured
    );
    let by_role = membership
        .map(|m| m.active && m.role.parse::<MemberRole>().ok() == Some(MemberRole::SuperAdmin))
        .unwrap_or(false);
    by_email || by_role
}

pub fn evaluate(
    caller_email: Option<&str>,
    membership: Option<&Membership>,
    super_admin_email: Option<&str>,
) -> ScopeGrant {
    if is_super_admin(caller_email, membership, super_admin_email) {
        return ScopeGrant::All;
    }

    let Some(membership) = membership.filter(|m| m.active) else {
        return ScopeGrant::Scoped(HashSet::new());
    };

    match membership.role.parse::<MemberRole>() {
        Ok(MemberRole::Admin) => ScopeGrant::from_list(ADMIN_SCOPES),
        Ok(MemberRole::Agent) if membership.scopes.is_empty() => {
            ScopeGrant::from_list(AGENT_SCOPES)
        }
        _ => ScopeGrant::Scoped(membership.scopes.iter().cloned().collect()),
    }
}

/// Proof that a caller passed authorization for one company.
#[derive(Debug, Clone)]
pub struct Access {
    company_id: CompanyId,
    user_id: Uuid,
    grant: ScopeGrant,
}

impl Access {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn is_super_admin(&self) -> bool {
        self.grant == ScopeGrant::All
    }

    pub fn allows_any(&self, required: &[&str]) -> bool {
        self.grant.allows_any(required)
    }

    /// Rejects use of this proof against a different company.
    pub fn ensure_company(&self, company_id: CompanyId) -> CrmResult<()> {
        if self.company_id == company_id || self.is_super_admin() {
            Ok(())
        } else {
            Err(CrmError::Forbidden(format!(
                "not a member of company {}",
                company_id
            )))
        }
    }
}

/// Loads the caller's membership and checks `required` against it.
/// Callers without an active membership are rejected unless super-admin.
pub async fn authorize(
    state: &AppState,
    caller: &Caller,
    company_id: CompanyId,
    required: &[&str],
) -> CrmResult<Access> {
    let membership = state
        .stores
        .directory
        .membership(caller.user_id, company_id)
        .await?;
    let grant = evaluate(
        caller.email.as_deref(),
        membership.as_ref(),
        state.config.auth.super_admin_email.as_deref(),
    );

    let is_member = membership.as_ref().map(|m| m.active).unwrap_or(false);
    if grant != ScopeGrant::All && !is_member {
        log::warn!(
            "User {} denied on company {}: no active membership",
            caller.user_id,
            company_id
        );
        return Err(CrmError::Forbidden(format!(
            "not a member of company {}",
            company_id
        )));
    }
    if !grant.allows_any(required) {
        return Err(CrmError::Forbidden(format!(
            "requires one of: {}",
            required.join(", ")
        )));
    }

    Ok(Access {
        company_id,
        user_id: caller.user_id,
        grant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn membership(role: &str, scopes: &[&str], active: bool) -> Membership {
        Membership {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            company_id: 1,
            email: "agent@example.com".into(),
            role: role.into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_or_semantics() {
        let m = membership("agent", &["whatsapp:read"], true);
        let grant = evaluate(None, Some(&m), None);
        assert!(grant.allows_any(&["whatsapp:read", "whatsapp:send"]));
        assert!(!grant.allows_any(&["settings:manage"]));
    }

    #[test]
    fn test_wildcard_scope() {
        let m = membership("agent", &["*"], true);
        assert!(evaluate(None, Some(&m), None).allows_any(&["settings:manage"]));
    }

    #[test]
    fn test_inactive_or_missing_membership_is_empty() {
        let m = membership("admin", &[], false);
        assert_eq!(
            evaluate(None, Some(&m), None),
            ScopeGrant::Scoped(HashSet::new())
        );
        assert!(!evaluate(None, None, None).allows_any(&["leads:read"]));
    }

    #[test]
    fn test_admin_gets_fixed_list() {
        let m = membership("admin", &["whatsapp:read"], true);
        let grant = evaluate(None, Some(&m), None);
        assert!(grant.allows_any(&["settings:manage"]));
        assert!(grant.allows_any(&["leads:delete"]));
    }

    #[test]
    fn test_super_admin_by_email_requires_exact_match() {
        assert_eq!(
            evaluate(Some("root@example.com"), None, Some("root@example.com")),
            ScopeGrant::All
        );
        assert_ne!(
            evaluate(Some("Root@example.com"), None, Some("root@example.com")),
            ScopeGrant::All
        );
    }

    #[test]
    fn test_agent_preset_when_no_explicit_scopes() {
        let m = membership("agent", &[], true);
        let grant = evaluate(None, Some(&m), None);
        assert!(grant.allows_any(&["whatsapp:send"]));
        assert!(!grant.allows_any(&["leads:delete"]));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Admin".parse::<MemberRole>().unwrap(), MemberRole::Admin);
        assert!("owner".parse::<MemberRole>().is_err());
    }
}
