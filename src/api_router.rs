//! Combines every module's routes into the application router.

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::core::rate_limit::rate_limit_middleware;
use crate::core::shared::state::AppState;

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .merge(crate::contacts::configure())
        .merge(crate::conversations::configure())
        .merge(crate::dashboards::configure())
        .merge(crate::followups::configure())
        .merge(crate::favorites::configure())
        .merge(crate::core::invitations::configure())
        .merge(crate::core::realtime::configure())
}

/// Full application with rate limiting, CORS and request tracing applied.
pub fn build_app(state: Arc<AppState>) -> Router {
    configure_api_routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
