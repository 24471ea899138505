use crate::AppState;
use ai_proxy_core::error::ProxyError;
use ai_proxy_core::types::openai::{ModelListResponse, ModelObject};
use axum::extract::State;
use axum::{Json, response::IntoResponse};

pub async fn list_models(State(state): State<AppState>) -> Result<impl IntoResponse, ProxyError> {
    let created = chrono::Utc::now().timestamp();
    let data = state
        .registry
        .list_names()
        .into_iter()
        .map(|id| ModelObject { id, object: "model".to_string(), created, owned_by: "ai-proxy".to_string() })
        .collect();

    Ok(Json(ModelListResponse { object: "list".to_string(), data }))
}
