//! Request-side translation for the Open Responses endpoint: lifts a
//! `/v1/responses` request (`input` + optional `instructions`, with prior
//! turns from `ResponseStateStore::history` prepended) into the
//! chat-completion shape every Backend speaks, and — for the non-streaming
//! leg — materializes a complete Responses object from a chat response.
//! Grounded on the same reversed-direction idiom as `messages_to_chat`
//! (itself grounded on the teacher's `openai_to_claude::translate_request` /
//! `claude_to_openai::translate_non_stream`); the Responses-specific output
//! item shapes (`message`, `function_call`) follow the echoed-field
//! convention established in `chat_to_responses::ChatToResponsesAdapter`.

use crate::chat_to_responses::ResponsesRequestEcho;
use ai_proxy_core::error::ProxyError;
use serde_json::{Value, json};
use uuid::Uuid;

/// `history` holds prior turns (already flattened input+output items, oldest
/// first) from `ResponseStateStore::history`; `input` is the caller's new
/// turn, either a bare string or a sequence of typed input items.
pub fn responses_input_to_chat(input: &Value, instructions: Option<&str>, history: &[Value]) -> Result<Value, ProxyError> {
    let mut messages = Vec::new();

    if let Some(instructions) = instructions.filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": instructions}));
    }

    for item in history {
        messages.push(input_item_to_chat_message(item)?);
    }

    match input {
        Value::String(text) => messages.push(json!({"role": "user", "content": text})),
        Value::Array(items) => {
            for item in items {
                messages.push(input_item_to_chat_message(item)?);
            }
        }
        other => return Err(ProxyError::InvalidShape(format!("responses input must be a string or array, got {other}"))),
    }

    Ok(json!({"messages": messages}))
}

fn input_item_to_chat_message(item: &Value) -> Result<Value, ProxyError> {
    if let Value::String(text) = item {
        return Ok(json!({"role": "user", "content": text}));
    }

    match item.get("type").and_then(|t| t.as_str()) {
        Some("function_call") => {
            let call_id = item.get("call_id").and_then(|v| v.as_str()).unwrap_or_default();
            let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            let arguments = item.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            Ok(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{"id": call_id, "type": "function", "function": {"name": name, "arguments": arguments}}],
            }))
        }
        Some("function_call_output") => {
            let call_id = item.get("call_id").and_then(|v| v.as_str()).unwrap_or_default();
            let output = match item.get("output") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Ok(json!({"role": "tool", "tool_call_id": call_id, "content": output}))
        }
        // A bare `{"role", "content"}` message, or `{"type":"message", ...}`.
        _ => {
            let role = item.get("role").and_then(|r| r.as_str()).unwrap_or("user");
            match item.get("content") {
                Some(Value::String(text)) => Ok(json!({"role": role, "content": text})),
                Some(Value::Array(parts)) => Ok(json!({"role": role, "content": convert_content_parts(parts)})),
                _ => Ok(json!({"role": role, "content": ""})),
            }
        }
    }
}

fn convert_content_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|part| match part.get("type").and_then(|t| t.as_str()) {
            Some("input_text") | Some("output_text") => {
                let text = part.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                Some(json!({"type": "text", "text": text}))
            }
            Some("input_image") => {
                let url = part.get("image_url").and_then(|u| u.as_str()).unwrap_or_default();
                Some(json!({"type": "image_url", "image_url": {"url": url}}))
            }
            other => {
                tracing::warn!(?other, "skipping unsupported responses input content part");
                None
            }
        })
        .collect()
}

/// Materializes a complete Responses object from a single non-streaming
/// chat-completion response, for the non-streaming leg of `/v1/responses`.
pub fn chat_response_to_responses(chat_response: &Value, echo: &ResponsesRequestEcho) -> Result<Value, ProxyError> {
    let model = chat_response.get("model").and_then(|v| v.as_str()).unwrap_or_default();
    let choice = chat_response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| ProxyError::Translation("chat response had no choices".to_string()))?;
    let message = choice.get("message").cloned().unwrap_or(json!({}));

    let mut output = Vec::new();
    if let Some(text) = message.get("content").and_then(|c| c.as_str())
        && !text.is_empty()
    {
        output.push(json!({
            "id": format!("msg_{}", Uuid::new_v4().simple()),
            "type": "message",
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": text}],
        }));
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            let call_id = tc.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let name = tc.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str()).unwrap_or_default();
            let arguments = tc.get("function").and_then(|f| f.get("arguments")).and_then(|v| v.as_str()).unwrap_or("{}");
            output.push(json!({
                "id": format!("fc_{}", Uuid::new_v4().simple()),
                "type": "function_call",
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
                "status": "completed",
            }));
        }
    }

    let finish_reason = choice.get("finish_reason").and_then(|f| f.as_str()).unwrap_or("stop");
    let status = if finish_reason == "length" { "incomplete" } else { "completed" };

    let mut obj = json!({
        "id": format!("resp_{}", Uuid::new_v4().simple()),
        "object": "response",
        "status": status,
        "model": model,
        "output": output,
        "usage": chat_response.get("usage").cloned().unwrap_or(Value::Null),
    });
    if status == "incomplete" {
        obj["incomplete_details"] = json!({"reason": "max_output_tokens"});
    }
    if let Some(t) = &echo.temperature {
        obj["temperature"] = t.clone();
    }
    if let Some(t) = &echo.top_p {
        obj["top_p"] = t.clone();
    }
    if let Some(t) = &echo.max_output_tokens {
        obj["max_output_tokens"] = t.clone();
    }
    if let Some(t) = &echo.tools {
        obj["tools"] = t.clone();
    }
    if let Some(t) = &echo.tool_choice {
        obj["tool_choice"] = t.clone();
    }
    obj["previous_response_id"] = echo.previous_response_id.clone().map(Value::String).unwrap_or(Value::Null);
    obj["metadata"] = echo.metadata.clone().unwrap_or(Value::Null);
    Ok(obj)
}
