mod admin;
mod auth;
mod proxy;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use gproxy_core::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(proxy::openai_chat_completions))
        .route(
            "/openai/v1/chat/completions",
            post(proxy::openai_chat_completions),
        )
        .route("/v1/models", get(proxy::openai_models))
        .route("/openai/v1/models", get(proxy::openai_models))
        .route("/{version}/models", get(proxy::gemini_models))
        .route(
            "/{version}/models/{model_action}",
            post(proxy::gemini_generate_content),
        )
        .route("/health", get(admin::health))
        .route("/admin/switch", post(admin::switch))
        .route(
            "/admin/flags",
            get(admin::get_flags).post(admin::set_flags),
        )
        .route("/admin/status", get(admin::status))
        .route(
            "/__bridge/identity/{index}",
            get(admin::identity_document),
        )
        .merge(gproxy_bridge::duplex_router(state.bridge.clone()))
        .with_state(state)
}
