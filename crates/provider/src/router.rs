//! The Router: builds a route, attempts each backend with bounded retry
//! and exponential backoff, classifies outcomes, and escalates to the
//! next backend on retryable exhaustion. Grounded on the teacher's
//! `crates/provider/src/common.rs` response-handling split
//! (`handle_response`/`handle_stream_response`) and `crates/provider/src/
//! routing.rs`'s lock-guarded-state texture, rebuilt around this proxy's
//! `Backend`/`BackendRegistry` instead of multi-format credentials.

use crate::common::{backoff_delay, build_client, build_url, extract_headers, is_retryable_status};
use ai_proxy_core::backend::{Backend, BackendRegistry};
use ai_proxy_core::error::ProxyError;
use ai_proxy_core::header_filter;
use ai_proxy_core::payload;
use ai_proxy_core::recorder::{Outcome, Recorder};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>;

pub struct NonStreamReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

pub struct StreamReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

pub enum Reply {
    NonStream(NonStreamReply),
    Stream(StreamReply),
}

/// Outcome of a single backend attempt, already drained where the Router
/// needs a decision before committing to a streaming reply.
enum AttemptOutcome {
    /// Retryable status (`408/409/429/500/502/503/504`) or a non-retryable
    /// `>=400` terminal response — both are fully-read bodies. The Router
    /// tells them apart via `is_retryable_status`.
    Final { status: u16, headers: Vec<(String, String)>, body: Bytes },
    Stream { status: u16, headers: Vec<(String, String)>, stream: ByteStream },
    Transport(String),
}

pub struct Router {
    client: reqwest::Client,
}

impl Router {
    pub fn new() -> Result<Self, ProxyError> {
        let client = build_client().map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn forward(
        &self,
        registry: &BackendRegistry,
        model: &str,
        path: &str,
        query: &str,
        raw_body: Bytes,
        is_stream: bool,
        inbound_headers: &[(String, String)],
        num_retries: u32,
        recorder: &Recorder,
    ) -> Result<Reply, ProxyError> {
        let route = registry.build_route(model)?;
        recorder.record_route(route.iter().map(|b| b.name.clone()).collect());

        let attempts_per_backend = num_retries.max(1);
        let mut last_retryable: Option<NonStreamReply> = None;

        for backend in &route {
            for attempt in 1..=attempts_per_backend {
                let url = build_url(&backend.base_url, path, query);
                let outbound_headers = header_filter::filter_outbound(inbound_headers, backend);
                let outbound_body = payload::rewrite(&raw_body, backend);

                recorder.record_backend_attempt(&backend.name, attempt, &url);

                match self.send_once(&url, &outbound_headers, outbound_body, backend, is_stream).await {
                    AttemptOutcome::Transport(message) => {
                        recorder.record_error(message);
                        if attempt < attempts_per_backend {
                            tokio::time::sleep(backoff_delay(attempt)).await;
                            continue;
                        }
                        last_retryable = None;
                    }
                    AttemptOutcome::Final { status, headers, body } => {
                        recorder.record_backend_response(status, headers.clone(), body.len() as u64);
                        if is_retryable_status(status) {
                            last_retryable = Some(NonStreamReply { status, headers, body });
                            if attempt < attempts_per_backend {
                                tokio::time::sleep(backoff_delay(attempt)).await;
                                continue;
                            }
                        } else {
                            let headers = header_filter::filter_inbound(&headers);
                            return Ok(Reply::NonStream(NonStreamReply { status, headers, body }));
                        }
                    }
                    AttemptOutcome::Stream { status, headers, stream } => {
                        recorder.record_stream_headers(headers.clone());
                        return Ok(Reply::Stream(streaming_reply(stream, headers, status, recorder.clone())));
                    }
                }
                break;
            }
        }

        if let Some(reply) = last_retryable {
            let headers = header_filter::filter_inbound(&reply.headers);
            return Ok(Reply::NonStream(NonStreamReply { status: reply.status, headers, body: reply.body }));
        }

        recorder.record_error("all configured backends failed");
        Err(ProxyError::AllBackendsFailed("all configured backends failed".to_string()))
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Bytes,
        backend: &Backend,
        is_stream: bool,
    ) -> AttemptOutcome {
        let mut req = self.client.post(url).timeout(backend.timeout()).body(body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return AttemptOutcome::Transport(e.to_string()),
        };

        let status = resp.status().as_u16();
        let headers = extract_headers(&resp);

        if is_retryable_status(status) || status >= 400 {
            let body = resp.bytes().await.unwrap_or_default();
            return AttemptOutcome::Final { status, headers, body };
        }

        if is_stream {
            let byte_stream = resp.bytes_stream().map(|r| r.map_err(|e| ProxyError::Internal(e.to_string())));
            return AttemptOutcome::Stream { status, headers, stream: Box::pin(byte_stream) };
        }

        match resp.bytes().await {
            Ok(body) => AttemptOutcome::Final { status, headers, body },
            Err(e) => AttemptOutcome::Transport(e.to_string()),
        }
    }
}

/// Guards exactly-once recorder finalization. Normal completion or upstream
/// error finalizes explicitly; if the returned stream is dropped before
/// either happens — the axum response body is torn down because the client
/// disconnected — `Drop` finalizes as `cancelled`. This stands in for the
/// disconnect-probe polling loop of a callback-based host: Rust's Stream +
/// Drop model makes cancellation-on-drop implicit rather than a condition
/// to check each iteration.
struct ForwardGuard {
    recorder: Recorder,
    done: bool,
}

impl ForwardGuard {
    fn finalize(&mut self, outcome: Outcome) {
        if !self.done {
            self.recorder.finalize(outcome);
            self.done = true;
        }
    }
}

impl Drop for ForwardGuard {
    fn drop(&mut self) {
        self.finalize(Outcome::Cancelled);
    }
}

struct StreamState {
    upstream: ByteStream,
    guard: ForwardGuard,
    sse_buffer: String,
}

/// Drains complete `\n\n`/`\r\n\r\n`-delimited SSE frames out of `buffer`,
/// concatenating each frame's decoded `delta.content` in arrival order.
/// Leaves any trailing partial frame in `buffer` for the next chunk.
fn drain_delta_content(buffer: &mut String) -> Option<String> {
    let mut text = String::new();
    while let Some(pos) = crate::sse::find_event_boundary(buffer) {
        let skip = if buffer[pos..].starts_with("\r\n\r\n") { 4 } else { 2 };
        let block = buffer[..pos].to_string();
        *buffer = buffer[pos + skip..].to_string();
        if let Some(content) = crate::sse::delta_content_from_block(&block) {
            text.push_str(&content);
        }
    }
    if text.is_empty() { None } else { Some(text) }
}

fn streaming_reply(upstream: ByteStream, headers: Vec<(String, String)>, status: u16, recorder: Recorder) -> StreamReply {
    let mut headers = header_filter::filter_inbound(&headers);
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
        headers.push(("content-type".to_string(), "text/event-stream".to_string()));
    }

    let state = StreamState {
        upstream,
        guard: ForwardGuard { recorder, done: false },
        sse_buffer: String::new(),
    };

    let body = futures::stream::unfold(state, |mut state| async move {
        match state.upstream.next().await {
            Some(Ok(chunk)) => {
                if let Ok(text) = std::str::from_utf8(&chunk) {
                    state.sse_buffer.push_str(text);
                }
                let delta_text = drain_delta_content(&mut state.sse_buffer);
                state.guard.recorder.record_stream_chunk(chunk.len(), delta_text.as_deref());
                Some((Ok(chunk), state))
            }
            Some(Err(e)) => {
                state.guard.recorder.record_error(e.to_string());
                state.guard.finalize(Outcome::Error);
                Some((Err(e), state))
            }
            None => {
                state.guard.finalize(Outcome::Success);
                None
            }
        }
    });

    StreamReply { status, headers, body: Box::pin(body) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streaming_reply_injects_event_stream_media_type_when_absent() {
        let stream: ByteStream = Box::pin(futures::stream::empty());
        let recorder = Recorder::new(std::env::temp_dir());
        let reply = streaming_reply(stream, vec![], 200, recorder);
        assert!(reply.headers.iter().any(|(k, v)| k == "content-type" && v == "text/event-stream"));
    }

    #[tokio::test]
    async fn streaming_reply_preserves_existing_content_type() {
        let stream: ByteStream = Box::pin(futures::stream::empty());
        let recorder = Recorder::new(std::env::temp_dir());
        let reply = streaming_reply(stream, vec![("content-type".to_string(), "text/event-stream; charset=utf-8".to_string())], 200, recorder);
        let ct: Vec<_> = reply.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("content-type")).collect();
        assert_eq!(ct.len(), 1);
    }

    #[tokio::test]
    async fn full_response_text_accumulates_decoded_deltas_not_raw_frames() {
        let chunks = vec![
            Ok(Bytes::from_static(b"event: x\ndata: {\"choices\":[{\"delta\":{\"content\":\"Hel")),
            Ok(Bytes::from_static(b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
        let recorder = Recorder::new(std::env::temp_dir());
        let mut reply = streaming_reply(stream, vec![], 200, recorder.clone());
        while reply.body.next().await.is_some() {}
        assert_eq!(recorder.full_response_text(), "Hello world");
    }

    #[tokio::test]
    async fn dropping_stream_before_exhaustion_finalizes_as_cancelled() {
        // Never polled to completion: the unfold state (and its ForwardGuard)
        // is dropped here, which must finalize the recorder exactly once.
        let stream: ByteStream = Box::pin(futures::stream::pending());
        let recorder = Recorder::new(std::env::temp_dir());
        let reply = streaming_reply(stream, vec![], 200, recorder.clone());
        drop(reply);
        recorder.finalize(Outcome::Error); // no-op: Drop already finalized as Cancelled
    }
}
