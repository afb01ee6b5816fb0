use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::nps::{send_after_appointment, NpsOutcome, NpsRequest};
use super::service::{DeliveryReport, FollowupService, FollowupView, ScheduleFollowupInput};
use crate::core::permissions::{authorize, scopes, Caller};
use crate::core::shared::error::CrmResult;
use crate::core::shared::models::CompanyId;
use crate::core::shared::state::AppState;
use crate::webhooks::ScheduleFollowupResponse;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/companies/:company/followups",
            post(schedule_followup_handler),
        )
        .route(
            "/api/companies/:company/followups/:phone",
            get(list_followups_handler),
        )
        .route("/api/companies/:company/nps", post(send_nps_handler))
        .route(
            "/api/functions/followup-status",
            post(followup_status_handler),
        )
}

pub async fn schedule_followup_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
    Json(input): Json<ScheduleFollowupInput>,
) -> CrmResult<Json<ScheduleFollowupResponse>> {
    authorize(&state, &caller, company_id, &[scopes::FOLLOWUPS_MANAGE]).await?;
    let service = FollowupService::new(state);
    Ok(Json(service.schedule(company_id, input).await?))
}

pub async fn list_followups_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, phone)): Path<(CompanyId, String)>,
    caller: Caller,
) -> CrmResult<Json<Vec<FollowupView>>> {
    authorize(
        &state,
        &caller,
        company_id,
        &[scopes::FOLLOWUPS_MANAGE, scopes::LEADS_READ],
    )
    .await?;
    let service = FollowupService::new(state);
    Ok(Json(service.list_for_phone(company_id, &phone).await?))
}

pub async fn send_nps_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
    Json(request): Json<NpsRequest>,
) -> CrmResult<Json<NpsOutcome>> {
    authorize(
        &state,
        &caller,
        company_id,
        &[scopes::FOLLOWUPS_MANAGE, scopes::WHATSAPP_SEND],
    )
    .await?;
    Ok(Json(send_after_appointment(&state, company_id, request).await?))
}

pub async fn followup_status_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(report): Json<DeliveryReport>,
) -> CrmResult<Json<FollowupView>> {
    authorize(&state, &caller, report.empresa_id, &[scopes::FOLLOWUPS_MANAGE]).await?;
    let service = FollowupService::new(state);
    Ok(Json(service.record_delivery(report).await?))
}
