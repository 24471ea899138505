//! Request-side translation for the Anthropic Messages endpoint: lifts a
//! `/v1/messages` request body into the chat-completion shape every Backend
//! speaks, and — for the non-streaming leg — converts a materialized chat
//! response back into a Messages response. Grounded on the teacher's
//! `openai_to_claude::translate_request` (direction reversed: OpenAI->Claude
//! there, Claude-shaped->OpenAI here) and, for the response leg, on the
//! inverse of `claude_to_openai::translate_non_stream`.

use crate::stop_reason::openai_finish_reason_to_anthropic_stop_reason;
use ai_proxy_core::error::ProxyError;
use serde_json::{Value, json};
use uuid::Uuid;

/// Converts an Anthropic Messages request body into an OpenAI
/// chat-completion request body.
pub fn messages_to_chat(body: &Value) -> Result<Value, ProxyError> {
    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or_default();

    let mut messages = Vec::new();
    if let Some(system) = extract_system_text(body) {
        messages.push(json!({"role": "system", "content": system}));
    }

    let anthropic_messages = body
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| ProxyError::InvalidShape("messages must be an array".to_string()))?;

    for msg in anthropic_messages {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        match msg.get("content") {
            Some(Value::String(text)) => {
                messages.push(json!({"role": role, "content": text}));
            }
            Some(Value::Array(blocks)) if role == "assistant" => {
                messages.push(assistant_message_from_blocks(blocks));
            }
            Some(Value::Array(blocks)) => {
                messages.extend(user_messages_from_blocks(blocks));
            }
            _ => messages.push(json!({"role": role, "content": ""})),
        }
    }

    let mut chat = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(max_tokens) = body.get("max_tokens") {
        chat["max_tokens"] = max_tokens.clone();
    }
    if let Some(temperature) = body.get("temperature") {
        chat["temperature"] = temperature.clone();
    }
    if let Some(top_p) = body.get("top_p") {
        chat["top_p"] = top_p.clone();
    }
    if let Some(stream) = body.get("stream") {
        chat["stream"] = stream.clone();
    }
    if let Some(stop) = body.get("stop_sequences") {
        chat["stop"] = stop.clone();
    }
    if let Some(tools) = convert_tools(body) {
        chat["tools"] = tools;
    }
    if let Some(tool_choice) = body.get("tool_choice") {
        chat["tool_choice"] = convert_tool_choice(tool_choice);
    }

    Ok(chat)
}

/// Converts a materialized chat-completion response into an Anthropic
/// Messages response, for the non-streaming leg of `/v1/messages`.
pub fn chat_response_to_messages(chat_response: &Value) -> Result<Value, ProxyError> {
    let model = chat_response.get("model").and_then(|v| v.as_str()).unwrap_or_default();
    let choice = chat_response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| ProxyError::Translation("chat response had no choices".to_string()))?;
    let message = choice.get("message").cloned().unwrap_or(json!({}));

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(|c| c.as_str())
        && !text.is_empty()
    {
        content.push(json!({"type": "text", "text": text}));
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let name = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let args_str = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let input = serde_json::from_str::<Value>(args_str).unwrap_or_else(|_| json!({"raw": args_str}));
            content.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
        }
    }

    let finish_reason = choice.get("finish_reason").and_then(|f| f.as_str()).unwrap_or("stop");
    let stop_reason = openai_finish_reason_to_anthropic_stop_reason(finish_reason);

    let usage = chat_response.get("usage");
    let input_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).unwrap_or(0);
    let output_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).unwrap_or(0);

    Ok(json!({
        "id": format!("msg_{}", Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
    }))
}

fn extract_system_text(body: &Value) -> Option<String> {
    match body.get("system")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(parts) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n\n");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn assistant_message_from_blocks(blocks: &[Value]) -> Value {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    text_parts.push(text.to_string());
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let input = block.get("input").cloned().unwrap_or(json!({}));
                let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                }));
            }
            _ => {}
        }
    }

    let content = if text_parts.is_empty() { Value::Null } else { Value::String(text_parts.join("")) };
    let mut message = json!({"role": "assistant", "content": content});
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

/// A single Anthropic user turn's content blocks may interleave text/image
/// parts with `tool_result` blocks; each `tool_result` becomes its own
/// `tool` role message, and any remaining text/image parts become one
/// `user` message (order preserved).
fn user_messages_from_blocks(blocks: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("tool_result") => {
                if !parts.is_empty() {
                    out.push(json!({"role": "user", "content": Value::Array(std::mem::take(&mut parts))}));
                }
                let tool_use_id = block.get("tool_use_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let content = match block.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                out.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}));
            }
            Some("text") => {
                let text = block.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                parts.push(json!({"type": "text", "text": text}));
            }
            Some("image") => {
                parts.push(block.clone());
            }
            _ => {}
        }
    }

    if !parts.is_empty() {
        out.push(json!({"role": "user", "content": Value::Array(parts)}));
    }
    out
}

fn convert_tools(body: &Value) -> Option<Value> {
    let tools = body.get("tools")?.as_array()?;
    let converted: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name")?.as_str()?;
            let description = tool.get("description").and_then(|d| d.as_str()).unwrap_or("");
            let parameters = tool.get("input_schema").cloned().unwrap_or(json!({"type": "object", "properties": {}}));
            Some(json!({
                "type": "function",
                "function": {"name": name, "description": description, "parameters": parameters},
            }))
        })
        .collect();
    (!converted.is_empty()).then_some(Value::Array(converted))
}

fn convert_tool_choice(tc: &Value) -> Value {
    match tc.get("type").and_then(|t| t.as_str()) {
        Some("auto") => json!("auto"),
        Some("any") => json!("required"),
        Some("none") => json!("none"),
        Some("tool") => {
            let name = tc.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            json!({"type": "function", "function": {"name": name}})
        }
        _ => json!("auto"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_field_becomes_leading_system_message() {
        let body = json!({"model": "alpha", "system": "be terse", "messages": [{"role": "user", "content": "hi"}]});
        let chat = messages_to_chat(&body).unwrap();
        let messages = chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be terse");
    }

    #[test]
    fn tool_result_block_becomes_tool_message() {
        let body = json!({
            "model": "alpha",
            "messages": [{"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "content": "42"}]}],
        });
        let chat = messages_to_chat(&body).unwrap();
        let messages = chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "tool");
        assert_eq!(messages[0]["tool_call_id"], "toolu_1");
    }

    #[test]
    fn assistant_tool_use_block_becomes_tool_call() {
        let body = json!({
            "model": "alpha",
            "messages": [{"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}]}],
        });
        let chat = messages_to_chat(&body).unwrap();
        let messages = chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["tool_calls"][0]["function"]["name"], "lookup");
    }

    #[test]
    fn chat_response_round_trips_text_and_tool_calls() {
        let chat_response = json!({
            "id": "chatcmpl-1",
            "model": "alpha",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi", "tool_calls": null}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5},
        });
        let messages_resp = chat_response_to_messages(&chat_response).unwrap();
        assert_eq!(messages_resp["content"][0]["text"], "hi");
        assert_eq!(messages_resp["stop_reason"], "end_turn");
        assert_eq!(messages_resp["usage"]["input_tokens"], 3);
    }

    #[test]
    fn malformed_tool_call_arguments_become_raw_field() {
        let chat_response = json!({
            "id": "chatcmpl-1",
            "model": "alpha",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": null, "tool_calls": [{"id": "call_1", "function": {"name": "f", "arguments": "not json"}}]}, "finish_reason": "tool_calls"}],
        });
        let messages_resp = chat_response_to_messages(&chat_response).unwrap();
        assert_eq!(messages_resp["content"][0]["input"]["raw"], "not json");
        assert_eq!(messages_resp["stop_reason"], "tool_use");
    }
}
