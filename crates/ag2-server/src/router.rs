//! C10: route table. Mirrors the teacher's `proxy_router` shape — routes
//! built on a cloned `Arc<AppState>`, with the API-key and CORS middleware
//! layered outermost so they see every request regardless of match.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use ag2_core::AppState;

use crate::{auth, cors, handlers};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/models", get(handlers::anthropic::list_models))
        .route("/v1/messages", post(handlers::anthropic::create_message))
        .route("/v1/messages/count_tokens", post(handlers::anthropic::count_tokens))
        .route("/v1beta/models", get(handlers::gemini::list_models))
        .route("/v1beta/models/{*name}", get(handlers::gemini::get_model))
        .route("/v1beta/models/{*name}", post(handlers::gemini::dispatch_action))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .layer(middleware::from_fn(cors::cors_layer))
        .with_state(state)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
