use crate::AppState;
use crate::dispatch;
use ai_proxy_core::error::ProxyError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;

/// `/v1/rerank`: no client-protocol translation, forwarded as-is.
pub async fn rerank(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ProxyError> {
    let parsed: Value = serde_json::from_slice(&body).map_err(|e| ProxyError::InvalidJson(e.to_string()))?;
    let model = parsed
        .get("model")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::InvalidShape("model is required".to_string()))?;

    let query_ok = parsed.get("query").and_then(|v| v.as_str()).is_some_and(|q| !q.trim().is_empty());
    if !query_ok {
        return Err(ProxyError::InvalidShape("query must be a non-empty string".to_string()));
    }
    let documents_ok = parsed.get("documents").and_then(|v| v.as_array()).is_some_and(|a| !a.is_empty());
    if !documents_ok {
        return Err(ProxyError::InvalidShape("documents must be a non-empty array".to_string()));
    }
    if let Some(top_n) = parsed.get("top_n")
        && !top_n.as_u64().is_some_and(|n| n > 0)
    {
        return Err(ProxyError::InvalidShape("top_n must be a positive integer".to_string()));
    }

    dispatch::passthrough(&state, &headers, body, model, "/rerank").await
}
