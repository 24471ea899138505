use crate::AppState;
use crate::dispatch;
use ai_proxy_core::error::ProxyError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;

/// Open Responses API (`/v1/responses`), translated to and from the
/// chat-completion wire format, with conversation state threaded through
/// `ResponseStateStore` via `previous_response_id`.
pub async fn responses(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ProxyError> {
    dispatch::responses(&state, &headers, body).await
}
