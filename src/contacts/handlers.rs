use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;

use super::service::ContactsService;
use super::types::*;
use crate::core::permissions::{authorize, scopes, Caller};
use crate::core::shared::error::CrmResult;
use crate::core::shared::models::CompanyId;
use crate::core::shared::state::AppState;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/companies/:company/leads",
            get(list_leads_handler).post(add_contact_handler),
        )
        .route("/api/companies/:company/leads/:phone", get(get_lead_handler))
        .route(
            "/api/companies/:company/leads/:phone/stage",
            put(update_stage_handler),
        )
        .route(
            "/api/companies/:company/leads/:phone/tags",
            put(update_tags_handler),
        )
        .route(
            "/api/companies/:company/leads/:phone/board",
            put(move_on_board_handler),
        )
        .route(
            "/api/functions/delete-lead-with-conversations",
            post(delete_lead_handler),
        )
}

pub async fn list_leads_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
    Query(query): Query<ListLeadsQuery>,
) -> CrmResult<Json<LeadListResponse>> {
    authorize(&state, &caller, company_id, &[scopes::LEADS_READ]).await?;
    let service = ContactsService::new(state);
    Ok(Json(service.list(company_id, query).await?))
}

pub async fn add_contact_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
    Json(request): Json<AddContactRequest>,
) -> CrmResult<(StatusCode, Json<LeadView>)> {
    authorize(&state, &caller, company_id, &[scopes::LEADS_WRITE]).await?;
    let service = ContactsService::new(state);
    let lead = service.add_contact(company_id, request).await?;
    Ok((StatusCode::CREATED, Json(lead.into())))
}

pub async fn get_lead_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, phone)): Path<(CompanyId, String)>,
    caller: Caller,
) -> CrmResult<Json<LeadView>> {
    authorize(&state, &caller, company_id, &[scopes::LEADS_READ]).await?;
    let service = ContactsService::new(state);
    Ok(Json(service.get(company_id, &phone).await?.into()))
}

pub async fn update_stage_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, phone)): Path<(CompanyId, String)>,
    caller: Caller,
    Json(request): Json<UpdateStageRequest>,
) -> CrmResult<Json<LeadView>> {
    authorize(&state, &caller, company_id, &[scopes::LEADS_WRITE]).await?;
    let service = ContactsService::new(state);
    let lead = service.update_stage(company_id, &phone, request.stage).await?;
    Ok(Json(lead.into()))
}

pub async fn update_tags_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, phone)): Path<(CompanyId, String)>,
    caller: Caller,
    Json(request): Json<UpdateTagsRequest>,
) -> CrmResult<Json<LeadView>> {
    authorize(&state, &caller, company_id, &[scopes::LEADS_WRITE]).await?;
    let service = ContactsService::new(state);
    let lead = service.update_tags(company_id, &phone, request.tags).await?;
    Ok(Json(lead.into()))
}

pub async fn move_on_board_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, phone)): Path<(CompanyId, String)>,
    caller: Caller,
    Json(request): Json<MoveOnBoardRequest>,
) -> CrmResult<Json<LeadView>> {
    authorize(&state, &caller, company_id, &[scopes::LEADS_WRITE]).await?;
    let service = ContactsService::new(state);
    let lead = service.move_on_board(company_id, &phone, request).await?;
    Ok(Json(lead.into()))
}

pub async fn delete_lead_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<DeleteLeadRequest>,
) -> CrmResult<Json<DeleteLeadResponse>> {
    let access = authorize(&state, &caller, request.empresa_id, &[scopes::LEADS_DELETE]).await?;
    let service = ContactsService::new(state);
    let response = service
        .delete_with_conversations(&access, request.empresa_id, &request.phone_number)
        .await?;
    Ok(Json(response))
}
