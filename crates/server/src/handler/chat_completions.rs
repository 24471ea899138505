use crate::AppState;
use crate::dispatch;
use ai_proxy_core::error::ProxyError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;

pub async fn chat_completions(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ProxyError> {
    dispatch::chat_completions(&state, &headers, body).await
}
