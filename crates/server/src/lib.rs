//! HTTP surface: axum router wiring, application state, and dispatch.
//! Grounded on the teacher's `crates/server/src/lib.rs` route composition,
//! stripped of the dashboard/JWT/websocket/rate-limit layers this proxy
//! has no use for (no client auth, no admin UI — see spec Non-goals).

pub mod dispatch;
pub mod handler;
pub mod middleware;
pub mod streaming;

use ai_proxy_core::backend::BackendRegistry;
use ai_proxy_core::config::Config;
use ai_proxy_core::metrics::Metrics;
use ai_proxy_core::state_store::ResponseStateStore;
use ai_proxy_provider::Router as BackendRouter;
use arc_swap::ArcSwap;
use axum::{Router, middleware as axum_mw};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub registry: Arc<BackendRegistry>,
    pub router: Arc<BackendRouter>,
    pub state_store: Arc<ResponseStateStore>,
    pub metrics: Arc<Metrics>,
    pub start_time: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit_bytes = state.config.load().body_limit_mb * 1024 * 1024;

    let public_routes = Router::new()
        .route("/health", axum::routing::get(handler::health::health))
        .route("/metrics", axum::routing::get(handler::health::metrics));

    let admin_routes = Router::new()
        .route("/admin/config", axum::routing::get(handler::admin::admin_config))
        .route("/admin/metrics", axum::routing::get(handler::admin::admin_metrics))
        .route(
            "/admin/models",
            axum::routing::get(handler::admin::admin_models).post(handler::admin::register_model),
        );

    let api_routes = Router::new()
        .route("/v1/models", axum::routing::get(handler::models::list_models))
        .route("/v1/chat/completions", axum::routing::post(handler::chat_completions::chat_completions))
        .route("/v1/messages", axum::routing::post(handler::messages::messages))
        .route("/v1/responses", axum::routing::post(handler::responses::responses))
        .route("/v1/embeddings", axum::routing::post(handler::embeddings::embeddings))
        .route("/v1/rerank", axum::routing::post(handler::rerank::rerank))
        .layer(RequestBodyLimitLayer::new(body_limit_bytes));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(api_routes)
        .layer(axum_mw::from_fn(middleware::request_logging::request_logging_middleware))
        .layer(axum_mw::from_fn(middleware::request_context::request_context_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
