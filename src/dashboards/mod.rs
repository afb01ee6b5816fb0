pub mod metrics;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::conversations::{aggregate, MessagePayload};
use crate::core::cache::company_prefix;
use crate::core::permissions::{authorize, scopes, Caller};
use crate::core::shared::error::CrmResult;
use crate::core::shared::models::CompanyId;
use crate::core::shared::state::AppState;

pub use metrics::{day_buckets, funnel, viewer_offset, DayBucket, FunnelReport, StageCount};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardQuery {
    /// Viewer's UTC offset in minutes east, e.g. -180 for São Paulo.
    pub tz_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total: usize,
    pub active_sessions: usize,
    pub unread: usize,
    pub average_messages: f64,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub preview: String,
    pub awaits_reply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardReport {
    pub company_id: CompanyId,
    pub funnel: FunnelReport,
    pub leads_per_day: Vec<DayBucket>,
    pub messages_per_day: Vec<DayBucket>,
    pub conversations: ConversationStats,
    pub recent_activity: Vec<ActivityItem>,
    pub leads_truncated: bool,
    /// Set when the message window filled up, so the oldest
    /// `messages_per_day` buckets may be undercounted.
    pub messages_truncated: bool,
    pub generated_at: DateTime<Utc>,
}

pub async fn build_report(
    state: &AppState,
    company_id: CompanyId,
    query: &DashboardQuery,
    now: DateTime<Utc>,
) -> CrmResult<DashboardReport> {
    let limits = &state.config.limits;
    let offset = viewer_offset(query.tz_offset_minutes);

    let leads = state
        .stores
        .leads
        .list(company_id, limits.lead_snapshot)
        .await?;
    let recent = state
        .stores
        .messages
        .recent(company_id, limits.message_window)
        .await?;
    // one extra day so the oldest bucket is complete in any offset
    let window_start = now - Duration::days(metrics::DAY_BUCKETS + 1);
    let week = state
        .stores
        .messages
        .since(company_id, window_start, limits.message_window)
        .await?;

    let messages_truncated = week.len() as i64 >= limits.message_window;

    let recent_activity = recent
        .iter()
        .filter_map(|row| {
            let session_id = row.session_id.clone()?;
            let payload = MessagePayload::from_value(&row.message);
            Some(ActivityItem {
                session_id,
                created_at: row.created_at,
                preview: payload.preview(),
                awaits_reply: payload.awaits_reply(),
            })
        })
        .take(limits.recent_messages.max(0) as usize)
        .collect();

    let conversations = aggregate(recent, limits.message_window, now);
    let stats = ConversationStats {
        total: conversations.conversations.len(),
        active_sessions: conversations.active_sessions,
        unread: conversations
            .conversations
            .iter()
            .filter(|c| c.unread)
            .count(),
        average_messages: conversations.average_messages,
        truncated: conversations.truncated,
    };

    Ok(DashboardReport {
        company_id,
        funnel: funnel(leads.iter().map(|l| l.stage)),
        leads_per_day: day_buckets(leads.iter().map(|l| Some(l.created_at)), now, offset),
        messages_per_day: day_buckets(week.iter().map(|m| Some(m.created_at)), now, offset),
        conversations: stats,
        recent_activity,
        leads_truncated: leads.len() as i64 >= limits.lead_snapshot,
        messages_truncated,
        generated_at: now,
    })
}

pub async fn handle_get_dashboard(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
    Query(query): Query<DashboardQuery>,
) -> CrmResult<Json<DashboardReport>> {
    authorize(&state, &caller, company_id, &[scopes::DASHBOARD_READ]).await?;

    let key = format!(
        "{}dashboard:{}",
        company_prefix(company_id),
        query.tz_offset_minutes.unwrap_or(0)
    );
    if let Some(cached) = state.cache.get(&key).await {
        if let Ok(report) = serde_json::from_value::<DashboardReport>(cached) {
            return Ok(Json(report));
        }
    }

    let report = build_report(&state, company_id, &query, Utc::now()).await?;
    if let Ok(value) = serde_json::to_value(&report) {
        state.cache.insert(key, value).await;
    }
    Ok(Json(report))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/companies/:company/dashboard",
        get(handle_get_dashboard),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::{AddContactRequest, ContactsService};
    use crate::core::config::LimitsConfig;
    use crate::core::shared::models::NewMessage;
    use crate::core::shared::test_utils::TestAppStateBuilder;
    use serde_json::json;

    #[tokio::test]
    async fn test_report_over_memory_store() {
        let harness = TestAppStateBuilder::new().build();
        let contacts = ContactsService::new(harness.state.clone());
        for (i, phone) in ["5511999990001", "5511999990002", "5511999990003"]
            .iter()
            .enumerate()
        {
            contacts
                .add_contact(
                    2,
                    AddContactRequest {
                        name: format!("Lead {}", i),
                        phone: phone.to_string(),
                        qualification: None,
                        tags: vec![],
                    },
                )
                .await
                .unwrap();
        }
        contacts.update_stage(2, "5511999990003", 4).await.unwrap();

        let report = build_report(&harness.state, 2, &DashboardQuery::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.funnel.total, 3);
        assert_eq!(report.funnel.closed, 1);
        assert_eq!(report.funnel.qualification_rate, 33);
        assert_eq!(report.leads_per_day.len(), 7);
        assert_eq!(report.leads_per_day[6].count, 3);
        assert_eq!(report.conversations.total, 0);
        assert!(report.recent_activity.is_empty());
        assert!(!report.messages_truncated);
    }

    #[tokio::test]
    async fn test_full_message_window_is_flagged() {
        let harness = TestAppStateBuilder::new()
            .with_limits(LimitsConfig {
                message_window: 2,
                ..LimitsConfig::default()
            })
            .build();
        let now = Utc::now();
        for age_days in [3, 0, 0] {
            harness
                .state
                .stores
                .messages
                .append(NewMessage {
                    company_id: 2,
                    session_id: Some("5511999990001".into()),
                    message: json!({"type": "human", "content": "oi"}),
                    created_at: now - Duration::days(age_days),
                })
                .await
                .unwrap();
        }

        let report = build_report(&harness.state, 2, &DashboardQuery::default(), now)
            .await
            .unwrap();
        assert!(report.messages_truncated);
        let counted: usize = report.messages_per_day.iter().map(|b| b.count).sum();
        assert_eq!(counted, 2);
    }
}
