use crate::AppState;
use crate::dispatch;
use ai_proxy_core::error::ProxyError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;

/// Anthropic Messages API (`/v1/messages`), translated to and from the
/// chat-completion wire format every Backend speaks.
pub async fn messages(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ProxyError> {
    dispatch::messages(&state, &headers, body).await
}
