use crate::AppState;
use ai_proxy_core::backend::Backend;
use ai_proxy_core::error::ProxyError;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Json, http::StatusCode};
use serde::Deserialize;
use serde_json::json;

/// GET /admin/config — sanitized configuration (no API keys).
pub async fn admin_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({
        "host": config.host,
        "port": config.port,
        "debug": config.debug,
        "body_limit_mb": config.body_limit_mb,
        "connect_timeout": config.connect_timeout,
        "request_timeout": config.request_timeout,
        "model_names": config.model_list.iter().map(|m| m.model_name.clone()).collect::<Vec<_>>(),
        "router_settings": { "num_retries": config.router_settings.num_retries_or_default() },
        "general_settings": config.general_settings,
    }))
}

/// GET /admin/metrics — same as /metrics.
pub async fn admin_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// GET /admin/models — registered model names, defaults then added.
pub async fn admin_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "models": state.registry.list_names() }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterModelRequest {
    pub model_name: String,
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub target_model: Option<String>,
    #[serde(default)]
    pub supports_reasoning: Option<bool>,
    #[serde(default)]
    pub fallbacks: Option<Vec<String>>,
}

/// POST /admin/models — registers (or replaces) a backend at runtime.
pub async fn register_model(State(state): State<AppState>, Json(req): Json<RegisterModelRequest>) -> Result<impl IntoResponse, ProxyError> {
    if req.model_name.is_empty() {
        return Err(ProxyError::InvalidShape("model_name is required".to_string()));
    }
    if req.api_base.is_empty() {
        return Err(ProxyError::InvalidShape("api_base is required".to_string()));
    }

    let backend = Backend {
        name: req.model_name.clone(),
        base_url: req.api_base.trim_end_matches('/').to_string(),
        api_key: req.api_key,
        timeout_seconds: req.request_timeout,
        target_model: req.target_model,
        supports_reasoning: req.supports_reasoning.unwrap_or(false),
    };

    let outcome = state.registry.register(backend, req.fallbacks.clone())?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "model": req.model_name,
            "replaced": outcome.replaced,
            "fallbacks": req.fallbacks.unwrap_or_default(),
        })),
    ))
}
