//! Builds the final axum response for a streaming reply. Unlike the
//! teacher's `build_sse_response` (which re-parses each line to decide
//! between a bare `[DONE]` sentinel, a Claude-style `event:`/`data:` pair, or
//! plain JSON), every producer reaching this module already emits complete
//! wire-ready frames: the raw upstream byte stream for passthrough
//! endpoints, or fully-formed `event: ...\ndata: ...\n\n` strings from
//! `ChatToMessagesAdapter`/`ChatToResponsesAdapter`. This just turns either
//! into a chunked `Body`.

use ai_proxy_core::error::ProxyError;
use ai_proxy_provider::router::ByteStream;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{Stream, StreamExt};

fn apply_headers(mut builder: axum::http::response::Builder, headers: Vec<(String, String)>) -> axum::http::response::Builder {
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(&value)) {
            builder = builder.header(name, value);
        }
    }
    builder
}

/// Response for a raw passthrough stream (`/v1/chat/completions`,
/// embeddings, rerank): the upstream bytes are forwarded unchanged.
pub fn raw_stream_response(status: u16, headers: Vec<(String, String)>, body: ByteStream) -> axum::response::Response {
    let builder = apply_headers(Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK)), headers);
    builder
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
        .into_response()
}

/// Response for a translated stream of pre-formatted SSE frames (Messages,
/// Responses). A translation error mid-stream is folded into a final
/// `event: error` frame rather than tearing down the HTTP body, since the
/// status/headers for this response were already sent.
pub fn sse_response(status: u16, headers: Vec<(String, String)>, frames: impl Stream<Item = Result<String, ProxyError>> + Send + 'static) -> axum::response::Response {
    let body = Body::from_stream(frames.map(|result| {
        let text = match result {
            Ok(text) => text,
            Err(e) => error_frame(&e),
        };
        Ok::<Bytes, std::convert::Infallible>(Bytes::from(text.into_bytes()))
    }));
    let builder = apply_headers(Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK)), headers);
    builder.body(body).unwrap_or_else(|_| Response::new(Body::empty())).into_response()
}

fn error_frame(e: &ProxyError) -> String {
    let payload = serde_json::json!({"error": {"message": e.to_string()}});
    format!("event: error\ndata: {payload}\n\n")
}
