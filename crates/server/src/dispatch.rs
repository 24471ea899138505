//! Thin per-endpoint dispatch. Grounded on the teacher's `dispatch()`
//! (`crates/server/src/dispatch.rs`), but drastically smaller: the
//! teacher's version owned multi-provider credential selection, a
//! model-fallback loop, bootstrap-retry, and non-stream keepalive — all of
//! that now lives inside `ai_proxy_provider::Router::forward`, so each
//! function here only needs to validate, translate (where the endpoint's
//! client protocol differs from the wire format every Backend speaks),
//! call the router once, and translate the reply back.
//!
//! Every path records exactly one `Recorder::finalize` call, except the
//! streaming paths, where `Router::forward`'s `ForwardGuard` already owns
//! that lifecycle over the raw upstream byte stream (success, error, or
//! cancellation-on-drop) — translating that stream into a client-facing
//! protocol downstream does not get a second, competing finalize.

use crate::AppState;
use crate::streaming::{raw_stream_response, sse_response};
use ai_proxy_core::error::ProxyError;
use ai_proxy_core::recorder::{Outcome, Recorder, RequestLogRequest};
use ai_proxy_core::state_store::ResponseStateRecord;
use ai_proxy_provider::Reply;
use ai_proxy_provider::sse::parse_sse_stream;
use ai_proxy_translator::{
    ChatToMessagesAdapter, ChatToResponsesAdapter, ResponsesRequestEcho, chat_response_to_messages, chat_response_to_responses, messages_to_chat,
    responses_input_to_chat,
};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;

fn parse_body(raw: &Bytes) -> Result<Value, ProxyError> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| ProxyError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ProxyError::InvalidShape("request body must be a JSON object".to_string()));
    }
    Ok(value)
}

fn require_model(body: &Value) -> Result<String, ProxyError> {
    body.get("model")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::InvalidShape("model is required".to_string()))
}

fn require_messages(body: &Value) -> Result<(), ProxyError> {
    let ok = body.get("messages").and_then(|m| m.as_array()).is_some_and(|a| !a.is_empty());
    if ok {
        Ok(())
    } else {
        Err(ProxyError::InvalidShape("messages must be a non-empty array".to_string()))
    }
}

fn is_stream(body: &Value) -> bool {
    body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false)
}

fn inbound_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers.iter().filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string()))).collect()
}

fn new_recorder(state: &AppState, path: &str, inbound: &[(String, String)], raw_body: &Bytes, model: &str, stream: bool) -> Recorder {
    let config = state.config.load();
    let recorder = Recorder::new(config.recorder_dir());
    recorder.record_request(RequestLogRequest {
        method: "POST".to_string(),
        path: path.to_string(),
        query: String::new(),
        headers: ai_proxy_core::header_filter::mask_for_log(inbound),
        body: String::from_utf8_lossy(raw_body).to_string(),
        model_name: model.to_string(),
        is_stream: stream,
    });
    recorder
}

fn num_retries(state: &AppState) -> u32 {
    state.config.load().router_settings.num_retries_or_default()
}

fn json_response(status: u16, value: &Value) -> Response {
    (axum::http::StatusCode::from_u16(status).unwrap_or(axum::http::StatusCode::OK), [("content-type", "application/json")], value.to_string()).into_response()
}

fn non_stream_response(reply: ai_proxy_provider::NonStreamReply) -> Response {
    let has_content_type = reply.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
    let mut builder = axum::http::Response::builder().status(axum::http::StatusCode::from_u16(reply.status).unwrap_or(axum::http::StatusCode::OK));
    for (name, value) in &reply.headers {
        builder = builder.header(name, value);
    }
    if !has_content_type {
        builder = builder.header("content-type", "application/json");
    }
    builder.body(axum::body::Body::from(reply.body)).unwrap_or_else(|_| Response::new(axum::body::Body::empty())).into_response()
}

fn record_usage_metrics(state: &AppState, chat_response: &Value) {
    let Some(usage) = chat_response.get("usage") else { return };
    let input = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output = usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    state.metrics.record_tokens(input, output);
}

/// `/v1/chat/completions`: the wire format every Backend already speaks, so
/// the body is forwarded unchanged in either direction.
pub async fn chat_completions(state: &AppState, headers: &HeaderMap, raw_body: Bytes) -> Result<Response, ProxyError> {
    let start = std::time::Instant::now();
    let body = parse_body(&raw_body)?;
    let model = require_model(&body)?;
    require_messages(&body)?;
    let stream = is_stream(&body);
    let inbound = inbound_headers(headers);
    state.metrics.record_request(&model);
    let recorder = new_recorder(state, "/chat/completions", &inbound, &raw_body, &model, stream);

    let result = state.router.forward(&state.registry, &model, "/chat/completions", "", raw_body, stream, &inbound, num_retries(state), &recorder).await;
    state.metrics.record_latency_ms(start.elapsed().as_millis());
    match result {
        Ok(Reply::NonStream(r)) => {
            if r.status >= 400 {
                state.metrics.record_error();
            } else if let Ok(chat_response) = serde_json::from_slice::<Value>(&r.body) {
                record_usage_metrics(state, &chat_response);
            }
            recorder.finalize(if r.status < 400 { Outcome::Success } else { Outcome::Error });
            Ok(non_stream_response(r))
        }
        Ok(Reply::Stream(r)) => Ok(raw_stream_response(r.status, r.headers, r.body)),
        Err(e) => {
            state.metrics.record_error();
            recorder.finalize(Outcome::Error);
            Err(e)
        }
    }
}

/// `/v1/messages`: translate Anthropic Messages <-> chat-completion.
pub async fn messages(state: &AppState, headers: &HeaderMap, raw_body: Bytes) -> Result<Response, ProxyError> {
    let start = std::time::Instant::now();
    let body = parse_body(&raw_body)?;
    let model = require_model(&body)?;
    require_messages(&body)?;
    let stream = is_stream(&body);
    let inbound = inbound_headers(headers);
    state.metrics.record_request(&model);
    let recorder = new_recorder(state, "/messages", &inbound, &raw_body, &model, stream);

    let chat_request = messages_to_chat(&body)?;
    let chat_body = Bytes::from(serde_json::to_vec(&chat_request)?);

    let result = state.router.forward(&state.registry, &model, "/chat/completions", "", chat_body, stream, &inbound, num_retries(state), &recorder).await;
    state.metrics.record_latency_ms(start.elapsed().as_millis());
    match result {
        Ok(Reply::NonStream(r)) => {
            if r.status >= 400 {
                state.metrics.record_error();
                recorder.finalize(Outcome::Error);
                return Ok(non_stream_response(r));
            }
            let chat_response: Value = serde_json::from_slice(&r.body).map_err(|e| ProxyError::Translation(e.to_string()))?;
            record_usage_metrics(state, &chat_response);
            let messages_response = chat_response_to_messages(&chat_response)?;
            recorder.finalize(Outcome::Success);
            Ok(json_response(200, &messages_response))
        }
        Ok(Reply::Stream(r)) => Ok(translate_to_messages_stream(r, model)),
        Err(e) => {
            state.metrics.record_error();
            recorder.finalize(Outcome::Error);
            Err(e)
        }
    }
}

fn translate_to_messages_stream(reply: ai_proxy_provider::StreamReply, model: String) -> Response {
    let events = parse_sse_stream(reply.body);
    let adapter = ChatToMessagesAdapter::new(&model);

    let frames = futures::stream::unfold((events, adapter, false), |(mut events, mut adapter, ended)| async move {
        if ended {
            return None;
        }
        match events.next().await {
            Some(Ok(event)) => match adapter.on_data(&event.data) {
                Ok(frames) => Some((Ok(frames.join("")), (events, adapter, false))),
                Err(e) => Some((Err(e), (events, adapter, true))),
            },
            Some(Err(e)) => Some((Err(e), (events, adapter, true))),
            None => {
                let frames = adapter.on_stream_end();
                if frames.is_empty() { None } else { Some((Ok(frames.join("")), (events, adapter, true))) }
            }
        }
    });

    sse_response(reply.status, reply.headers, frames)
}

fn echo_from_body(body: &Value) -> ResponsesRequestEcho {
    ResponsesRequestEcho {
        temperature: body.get("temperature").cloned(),
        top_p: body.get("top_p").cloned(),
        max_output_tokens: body.get("max_output_tokens").cloned(),
        tools: body.get("tools").cloned(),
        tool_choice: body.get("tool_choice").cloned(),
        previous_response_id: body.get("previous_response_id").and_then(|v| v.as_str()).map(str::to_string),
        metadata: body.get("metadata").cloned(),
    }
}

fn store_response_state(state: &AppState, response_object: &Value, input: &Value, model: &str) {
    let id = response_object.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    if id.is_empty() {
        return;
    }
    let record = ResponseStateRecord {
        id,
        previous_response_id: response_object.get("previous_response_id").and_then(|v| v.as_str()).map(str::to_string),
        model: model.to_string(),
        status: response_object.get("status").and_then(|v| v.as_str()).unwrap_or("completed").to_string(),
        input_data: input.clone(),
        output_data: response_object.get("output").cloned().unwrap_or(Value::Array(vec![])),
        usage: response_object.get("usage").cloned().unwrap_or(Value::Null),
        created_at: chrono::Utc::now(),
        metadata: response_object.get("metadata").cloned().filter(|v| !v.is_null()),
        response_object: response_object.clone(),
    };
    state.state_store.put(record);
}

/// `/v1/responses`: translate Open Responses input <-> chat-completion,
/// threading prior turns through `ResponseStateStore` via
/// `previous_response_id` and persisting the materialized turn afterward.
pub async fn responses(state: &AppState, headers: &HeaderMap, raw_body: Bytes) -> Result<Response, ProxyError> {
    let start = std::time::Instant::now();
    if !state.config.load().general_settings.enable_responses_endpoint {
        return Err(ProxyError::BadRequest("the responses endpoint is not enabled".to_string()));
    }
    let body = parse_body(&raw_body)?;
    let model = require_model(&body)?;
    let input = body.get("input").cloned().unwrap_or(Value::Null);
    if input.is_null() {
        return Err(ProxyError::InvalidShape("input is required".to_string()));
    }
    let instructions = body.get("instructions").and_then(|v| v.as_str());
    let previous_response_id = body.get("previous_response_id").and_then(|v| v.as_str()).map(str::to_string);
    let history = previous_response_id.as_deref().map(|id| state.state_store.history(id, None)).unwrap_or_default();
    let stream = is_stream(&body);
    let inbound = inbound_headers(headers);
    state.metrics.record_request(&model);
    let recorder = new_recorder(state, "/responses", &inbound, &raw_body, &model, stream);

    let mut chat_request = responses_input_to_chat(&input, instructions, &history)?;
    chat_request["model"] = Value::String(model.clone());
    if stream {
        chat_request["stream"] = Value::Bool(true);
    }
    let chat_body = Bytes::from(serde_json::to_vec(&chat_request)?);
    let echo = echo_from_body(&body);

    let result = state.router.forward(&state.registry, &model, "/chat/completions", "", chat_body, stream, &inbound, num_retries(state), &recorder).await;
    state.metrics.record_latency_ms(start.elapsed().as_millis());
    match result {
        Ok(Reply::NonStream(r)) => {
            if r.status >= 400 {
                state.metrics.record_error();
                recorder.finalize(Outcome::Error);
                return Ok(non_stream_response(r));
            }
            let chat_response: Value = serde_json::from_slice(&r.body).map_err(|e| ProxyError::Translation(e.to_string()))?;
            record_usage_metrics(state, &chat_response);
            let responses_object = chat_response_to_responses(&chat_response, &echo)?;
            store_response_state(state, &responses_object, &input, &model);
            recorder.finalize(Outcome::Success);
            Ok(json_response(200, &responses_object))
        }
        Ok(Reply::Stream(r)) => Ok(translate_to_responses_stream(state.clone(), r, model, echo, input)),
        Err(e) => {
            state.metrics.record_error();
            recorder.finalize(Outcome::Error);
            Err(e)
        }
    }
}

fn translate_to_responses_stream(app_state: AppState, reply: ai_proxy_provider::StreamReply, model: String, echo: ResponsesRequestEcho, input: Value) -> Response {
    let events = parse_sse_stream(reply.body);
    let adapter = ChatToResponsesAdapter::new(&model, echo);

    struct State {
        events: std::pin::Pin<Box<dyn futures::Stream<Item = Result<ai_proxy_provider::sse::SseEvent, ProxyError>> + Send>>,
        adapter: ChatToResponsesAdapter,
        queue: std::collections::VecDeque<String>,
        ended: bool,
    }

    let mut init = State { events, adapter, queue: std::collections::VecDeque::new(), ended: false };
    for frame in init.adapter.start() {
        init.queue.push_back(frame);
    }

    let frames = futures::stream::unfold((init, app_state, model, input), |(mut st, app_state, model, input)| async move {
        loop {
            if let Some(frame) = st.queue.pop_front() {
                return Some((Ok(frame), (st, app_state, model, input)));
            }
            if st.ended {
                return None;
            }
            match st.events.next().await {
                Some(Ok(event)) => {
                    let new_frames = st.adapter.on_data(&event.data);
                    if let Some(obj) = st.adapter.take_final_response() {
                        store_response_state(&app_state, &obj, &input, &model);
                    }
                    st.queue.extend(new_frames);
                }
                Some(Err(e)) => {
                    st.ended = true;
                    return Some((Err(e), (st, app_state, model, input)));
                }
                None => {
                    let new_frames = st.adapter.on_stream_end();
                    if let Some(obj) = st.adapter.take_final_response() {
                        store_response_state(&app_state, &obj, &input, &model);
                    }
                    st.queue.extend(new_frames);
                    st.ended = true;
                }
            }
        }
    });

    sse_response(reply.status, reply.headers, frames)
}

/// Shared passthrough for `/v1/embeddings` and `/v1/rerank`: neither client
/// protocol differs from what a Backend speaks for these paths, so the body
/// forwards unchanged (never streamed).
pub async fn passthrough(state: &AppState, headers: &HeaderMap, raw_body: Bytes, model: String, upstream_path: &str) -> Result<Response, ProxyError> {
    let start = std::time::Instant::now();
    let inbound = inbound_headers(headers);
    state.metrics.record_request(&model);
    let recorder = new_recorder(state, upstream_path, &inbound, &raw_body, &model, false);

    let result = state.router.forward(&state.registry, &model, upstream_path, "", raw_body, false, &inbound, num_retries(state), &recorder).await;
    state.metrics.record_latency_ms(start.elapsed().as_millis());
    match result {
        Ok(Reply::NonStream(r)) => {
            if r.status >= 400 {
                state.metrics.record_error();
            }
            recorder.finalize(if r.status < 400 { Outcome::Success } else { Outcome::Error });
            Ok(non_stream_response(r))
        }
        Ok(Reply::Stream(r)) => Ok(raw_stream_response(r.status, r.headers, r.body)),
        Err(e) => {
            state.metrics.record_error();
            recorder.finalize(Outcome::Error);
            Err(e)
        }
    }
}
