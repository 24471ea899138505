use crate::AppState;
use crate::dispatch;
use ai_proxy_core::error::ProxyError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;

/// `/v1/embeddings`: no client-protocol translation, forwarded as-is.
pub async fn embeddings(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ProxyError> {
    let parsed: Value = serde_json::from_slice(&body).map_err(|e| ProxyError::InvalidJson(e.to_string()))?;
    let model = parsed
        .get("model")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::InvalidShape("model is required".to_string()))?;

    let valid_input = match parsed.get("input") {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty() && items.iter().all(|i| i.is_string()),
        _ => false,
    };
    if !valid_input {
        return Err(ProxyError::InvalidShape("input must be a non-empty string or array of strings".to_string()));
    }

    dispatch::passthrough(&state, &headers, body, model, "/embeddings").await
}
