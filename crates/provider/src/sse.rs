//! SSE frame parsing over a raw byte stream, grounded on the teacher's
//! `crates/provider/src/sse.rs`: frame-oriented, tolerant of chunks split
//! across `\n`, multiple events per chunk, and comment/empty lines.

use ai_proxy_core::error::ProxyError;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use tokio_stream::StreamExt;

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

pub fn parse_sse_stream(
    byte_stream: impl Stream<Item = Result<Bytes, ProxyError>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<SseEvent, ProxyError>> + Send>> {
    Box::pin(async_stream(byte_stream))
}

struct SseState {
    stream: Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>,
    buffer: String,
}

fn async_stream(
    byte_stream: impl Stream<Item = Result<Bytes, ProxyError>> + Send + 'static,
) -> impl Stream<Item = Result<SseEvent, ProxyError>> + Send {
    futures::stream::unfold(
        SseState {
            stream: Box::pin(byte_stream),
            buffer: String::new(),
        },
        |mut state| async move {
            loop {
                if let Some(pos) = find_event_boundary(&state.buffer) {
                    let block = state.buffer[..pos].to_string();
                    let skip = if state.buffer[pos..].starts_with("\r\n\r\n") { 4 } else { 2 };
                    state.buffer = state.buffer[pos + skip..].to_string();

                    if let Some(event) = parse_event_block(&block) {
                        return Some((Ok(event), state));
                    }
                    continue;
                }

                match state.stream.next().await {
                    Some(Ok(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => state.buffer.push_str(text),
                        Err(e) => {
                            return Some((
                                Err(ProxyError::Internal(format!("invalid UTF-8 in SSE stream: {e}"))),
                                state,
                            ));
                        }
                    },
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => {
                        if !state.buffer.trim().is_empty() {
                            let block = std::mem::take(&mut state.buffer);
                            if let Some(event) = parse_event_block(&block) {
                                return Some((Ok(event), state));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

pub(crate) fn find_event_boundary(s: &str) -> Option<usize> {
    if let Some(pos) = s.find("\n\n") {
        return Some(pos);
    }
    if let Some(pos) = s.find("\r\n\r\n") {
        return Some(pos);
    }
    None
}

/// Parses a single SSE event block. Returns `None` for empty/comment-only
/// blocks. `data: [DONE]` is returned as a normal event — callers match on
/// the literal sentinel.
pub(crate) fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();

    for line in block.lines() {
        let line = line.trim_start_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseEvent { event: event_type, data: data_lines.join("\n") })
}

/// Extracts `choices[0].delta.content` from a raw chat-completions SSE
/// event block, for recorder archival only. Returns `None` for `[DONE]`,
/// non-JSON payloads, or events carrying no text delta.
pub(crate) fn delta_content_from_block(block: &str) -> Option<String> {
    let event = parse_event_block(block)?;
    if event.data.trim() == "[DONE]" {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&event.data).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn parses_event_with_type() {
        let block = "event: message_start\ndata: {\"type\": \"message_start\"}";
        let event = parse_event_block(block).unwrap();
        assert_eq!(event.event.as_deref(), Some("message_start"));
    }

    #[test]
    fn parses_multiline_data() {
        let block = "data: line1\ndata: line2";
        let event = parse_event_block(block).unwrap();
        assert_eq!(event.data, "line1\nline2");
    }

    #[test]
    fn comment_only_block_is_skipped() {
        assert!(parse_event_block(": keep-alive").is_none());
    }

    #[test]
    fn delta_content_extracts_text_and_skips_done() {
        let block = "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}";
        assert_eq!(delta_content_from_block(block).as_deref(), Some("hel"));
        assert!(delta_content_from_block("data: [DONE]").is_none());
        assert!(delta_content_from_block("data: {\"choices\":[{\"delta\":{}}]}").is_none());
    }

    #[tokio::test]
    async fn reassembles_events_split_across_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1")),
            Ok(Bytes::from_static(b"}\n\ndata: [DONE]\n\n")),
        ];
        let byte_stream = stream::iter(chunks);
        let mut events = parse_sse_stream(byte_stream);
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.data, "{\"a\":1}");
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.data, "[DONE]");
        assert!(events.next().await.is_none());
    }
}
