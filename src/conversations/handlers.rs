use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::aggregator::Conversation;
use super::service::*;
use crate::core::permissions::{authorize, scopes, Caller};
use crate::core::shared::error::CrmResult;
use crate::core::shared::models::CompanyId;
use crate::core::shared::state::AppState;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/companies/:company/conversations",
            get(list_conversations_handler),
        )
        .route(
            "/api/companies/:company/conversations/:session",
            get(get_conversation_handler),
        )
        .route(
            "/api/companies/:company/conversations/:session/resolve",
            post(resolve_handler),
        )
        .route(
            "/api/companies/:company/conversations/:session/messages",
            post(send_message_handler),
        )
        .route("/api/companies/:company/inbound", post(ingest_handler))
}

pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
) -> CrmResult<Json<ConversationList>> {
    authorize(&state, &caller, company_id, &[scopes::WHATSAPP_READ]).await?;
    let service = ConversationsService::new(state);
    Ok(Json(service.list(company_id).await?))
}

pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, session_id)): Path<(CompanyId, String)>,
    caller: Caller,
) -> CrmResult<Json<Conversation>> {
    authorize(&state, &caller, company_id, &[scopes::WHATSAPP_READ]).await?;
    let service = ConversationsService::new(state);
    Ok(Json(service.get(company_id, &session_id).await?))
}

pub async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, session_id)): Path<(CompanyId, String)>,
    caller: Caller,
) -> CrmResult<Json<ResolveOutcome>> {
    authorize(&state, &caller, company_id, &[scopes::WHATSAPP_SEND]).await?;
    let service = ConversationsService::new(state);
    Ok(Json(service.resolve(company_id, &session_id).await?))
}

pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Path((company_id, session_id)): Path<(CompanyId, String)>,
    caller: Caller,
    Json(request): Json<SendMessageRequest>,
) -> CrmResult<Json<SendOutcome>> {
    authorize(&state, &caller, company_id, &[scopes::WHATSAPP_SEND]).await?;
    let service = ConversationsService::new(state);
    Ok(Json(
        service
            .send(company_id, &session_id, &caller, request)
            .await?,
    ))
}

pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
    Json(inbound): Json<InboundMessage>,
) -> CrmResult<Json<IngestOutcome>> {
    authorize(&state, &caller, company_id, &[scopes::WHATSAPP_SEND]).await?;
    let service = ConversationsService::new(state);
    Ok(Json(service.ingest(company_id, inbound).await?))
}
