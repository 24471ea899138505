//! ChatToMessagesAdapter: rewrites an upstream OpenAI chat-completion SSE
//! stream into an Anthropic Messages SSE stream, per spec §4.7. Grounded on
//! the teacher's `claude_to_openai::translate_stream` state machine
//! (direction reversed and restructured as an owned adapter rather than a
//! free function over an external `TranslateState`, since this adapter also
//! owns content-block bookkeeping the teacher's flatter Claude->OpenAI
//! direction didn't need).

use crate::stop_reason::openai_finish_reason_to_anthropic_stop_reason;
use ai_proxy_core::error::ProxyError;
use serde_json::{Value, json};
use std::collections::HashMap;
use uuid::Uuid;

enum Block {
    Text { text: String },
    ToolUse { id: String, name: String, arguments: String },
}

#[derive(Clone)]
struct ToolCallState {
    block_index: usize,
}

pub struct ChatToMessagesAdapter {
    message_id: String,
    model: String,
    blocks: Vec<Block>,
    current_text_index: Option<usize>,
    tool_calls: HashMap<u64, ToolCallState>,
    input_tokens: u64,
    output_tokens: u64,
    message_started: bool,
    saw_done: bool,
    finalized: bool,
    last_finish_reason: Option<String>,
}

impl ChatToMessagesAdapter {
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            blocks: Vec::new(),
            current_text_index: None,
            tool_calls: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            message_started: false,
            saw_done: false,
            finalized: false,
            last_finish_reason: None,
        }
    }

    /// Feeds one upstream SSE `data:` payload (including the literal
    /// `"[DONE]"` sentinel) and returns zero or more framed SSE events.
    pub fn on_data(&mut self, data: &str) -> Result<Vec<String>, ProxyError> {
        if data.trim() == "[DONE]" {
            self.saw_done = true;
            return Ok(self.finalize());
        }
        let chunk: Value = serde_json::from_str(data)?;
        Ok(self.process_chunk(&chunk))
    }

    /// Called when the upstream connection ends without `[DONE]`.
    pub fn on_stream_end(&mut self) -> Vec<String> {
        self.finalize()
    }

    fn process_chunk(&mut self, chunk: &Value) -> Vec<String> {
        let mut out = Vec::new();
        let Some(choice) = chunk.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first()) else {
            self.record_usage(chunk);
            return out;
        };
        let delta = choice.get("delta").cloned().unwrap_or(json!({}));

        if !self.message_started
            && (delta.get("role").is_some() || delta.get("content").is_some() || delta.get("tool_calls").is_some())
        {
            self.message_started = true;
            out.push(self.frame("message_start", &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": Value::Null,
                    "stop_sequence": Value::Null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                }
            })));
        }

        if let Some(text) = delta.get("content").and_then(|c| c.as_str())
            && !text.is_empty()
        {
            out.extend(self.open_text_block_if_needed());
            if let Some(idx) = self.current_text_index
                && let Block::Text { text: accumulated } = &mut self.blocks[idx]
            {
                accumulated.push_str(text);
            }
            out.push(self.frame("content_block_delta", &json!({
                "type": "content_block_delta",
                "index": self.current_text_index.unwrap_or(0),
                "delta": {"type": "text_delta", "text": text},
            })));
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tool_calls {
                out.extend(self.process_tool_call_delta(tc));
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.last_finish_reason = Some(reason.to_string());
        }

        self.record_usage(chunk);
        out
    }

    fn record_usage(&mut self, chunk: &Value) {
        if let Some(usage) = chunk.get("usage") {
            if let Some(p) = usage.get("prompt_tokens").and_then(|v| v.as_u64()) {
                self.input_tokens = p;
            }
            if let Some(c) = usage.get("completion_tokens").and_then(|v| v.as_u64()) {
                self.output_tokens = c;
            }
        }
    }

    fn open_text_block_if_needed(&mut self) -> Vec<String> {
        if self.current_text_index.is_some() {
            return Vec::new();
        }
        let index = self.blocks.len();
        self.blocks.push(Block::Text { text: String::new() });
        self.current_text_index = Some(index);
        vec![self.frame("content_block_start", &json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "text", "text": ""},
        }))]
    }

    fn process_tool_call_delta(&mut self, tc: &Value) -> Vec<String> {
        let mut out = Vec::new();
        let Some(upstream_index) = tc.get("index").and_then(|v| v.as_u64()) else {
            return out;
        };

        if !self.tool_calls.contains_key(&upstream_index) {
            if let Some(text_idx) = self.current_text_index.take() {
                out.push(self.frame("content_block_stop", &json!({"type": "content_block_stop", "index": text_idx})));
            }

            let id = tc
                .get("id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4().simple()));
            let name = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let block_index = self.blocks.len();
            self.blocks.push(Block::ToolUse { id: id.clone(), name: name.clone(), arguments: String::new() });
            self.tool_calls.insert(upstream_index, ToolCallState { block_index });

            out.push(self.frame("content_block_start", &json!({
                "type": "content_block_start",
                "index": block_index,
                "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}},
            })));
        }

        if let Some(partial) = tc.get("function").and_then(|f| f.get("arguments")).and_then(|v| v.as_str()) {
            let block_index = self.tool_calls[&upstream_index].block_index;
            if let Block::ToolUse { arguments, .. } = &mut self.blocks[block_index] {
                arguments.push_str(partial);
            }
            out.push(self.frame("content_block_delta", &json!({
                "type": "content_block_delta",
                "index": block_index,
                "delta": {"type": "input_json_delta", "partial_json": partial},
            })));
        }

        out
    }

    fn finalize(&mut self) -> Vec<String> {
        if self.finalized {
            return Vec::new();
        }
        self.finalized = true;
        let mut out = Vec::new();

        if let Some(idx) = self.current_text_index.take() {
            out.push(self.frame("content_block_stop", &json!({"type": "content_block_stop", "index": idx})));
        }
        for state in self.tool_calls.values() {
            out.push(self.frame("content_block_stop", &json!({"type": "content_block_stop", "index": state.block_index})));
        }

        if !self.message_started {
            out.push(self.frame("message_start", &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": Value::Null,
                    "stop_sequence": Value::Null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                }
            })));
        }

        let stop_reason = self
            .last_finish_reason
            .as_deref()
            .map(openai_finish_reason_to_anthropic_stop_reason)
            .unwrap_or_else(|| "end_turn".to_string());

        out.push(self.frame("message_delta", &json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": Value::Null},
            "usage": {"output_tokens": self.output_tokens},
        })));
        out.push(self.frame("message_stop", &json!({"type": "message_stop"})));
        out
    }

    fn frame(&self, event_type: &str, payload: &Value) -> String {
        format!("event: {event_type}\ndata: {payload}\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(v: Value) -> String {
        v.to_string()
    }

    #[test]
    fn emits_message_start_once_on_first_content() {
        let mut adapter = ChatToMessagesAdapter::new("gpt-4o-mini");
        let events = adapter
            .on_data(&data(json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]})))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("event: message_start"));

        let events2 = adapter
            .on_data(&data(json!({"choices": [{"index": 0, "delta": {"content": "hi"}, "finish_reason": null}]})))
            .unwrap();
        assert!(!events2.iter().any(|e| e.contains("message_start")));
    }

    #[test]
    fn text_delta_opens_block_then_emits_delta() {
        let mut adapter = ChatToMessagesAdapter::new("gpt-4o-mini");
        let events = adapter
            .on_data(&data(json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "hello"}, "finish_reason": null}]})))
            .unwrap();
        assert!(events[0].contains("content_block_start"));
        assert!(events[1].contains("text_delta"));
    }

    #[test]
    fn tool_call_closes_open_text_block() {
        let mut adapter = ChatToMessagesAdapter::new("gpt-4o-mini");
        adapter
            .on_data(&data(json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "hi"}, "finish_reason": null}]})))
            .unwrap();
        let events = adapter
            .on_data(&data(json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "lookup", "arguments": ""}}]}, "finish_reason": null}]})))
            .unwrap();
        assert!(events[0].contains("content_block_stop"));
        assert!(events[1].contains("tool_use"));
    }

    #[test]
    fn done_sentinel_is_idempotent_and_maps_stop_reason() {
        let mut adapter = ChatToMessagesAdapter::new("gpt-4o-mini");
        adapter
            .on_data(&data(json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}]})))
            .unwrap();
        let done = adapter.on_data("[DONE]").unwrap();
        assert!(done.iter().any(|e| e.contains("\"stop_reason\":\"end_turn\"")));
        assert!(done.last().unwrap().contains("message_stop"));

        let again = adapter.on_data("[DONE]").unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn empty_stream_still_emits_well_formed_sequence() {
        let mut adapter = ChatToMessagesAdapter::new("gpt-4o-mini");
        let events = adapter.on_stream_end();
        assert!(events[0].contains("message_start"));
        assert!(events.last().unwrap().contains("message_stop"));
    }
}
