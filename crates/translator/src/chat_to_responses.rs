//! ChatToResponsesAdapter: rewrites an upstream OpenAI chat-completion SSE
//! stream into an Open Responses SSE stream, per spec §4.8. New state
//! machine — the teacher has no Responses-API translator to ground this on
//! directly — but it reuses the event-emission idiom established in
//! `chat_to_messages` (an owned adapter fed one upstream chunk at a time,
//! returning framed SSE strings) and the text-extraction/tool-call
//! bookkeeping from `openai_to_claude::translate_request`'s assistant-
//! message handling.

use serde_json::{Value, json};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ResponsesRequestEcho {
    pub temperature: Option<Value>,
    pub top_p: Option<Value>,
    pub max_output_tokens: Option<Value>,
    pub tools: Option<Value>,
    pub tool_choice: Option<Value>,
    pub previous_response_id: Option<String>,
    pub metadata: Option<Value>,
}

struct ToolItemState {
    output_index: usize,
    arguments: String,
}

pub struct ChatToResponsesAdapter {
    response_id: String,
    model: String,
    sequence_number: u64,
    created_at: i64,
    output: Vec<Value>,
    message_index: Option<usize>,
    message_opened_part: bool,
    tool_items: HashMap<u64, ToolItemState>,
    finish_reasons: Vec<String>,
    saw_done: bool,
    usage: Option<Value>,
    echo: ResponsesRequestEcho,
    finalized: bool,
    last_response_object: Option<Value>,
}

impl ChatToResponsesAdapter {
    pub fn new(model: &str, echo: ResponsesRequestEcho) -> Self {
        Self {
            response_id: format!("resp_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            sequence_number: 0,
            created_at: chrono::Utc::now().timestamp(),
            output: Vec::new(),
            message_index: None,
            message_opened_part: false,
            tool_items: HashMap::new(),
            finish_reasons: Vec::new(),
            saw_done: false,
            usage: None,
            echo,
            finalized: false,
            last_response_object: None,
        }
    }

    /// The fully materialized response object from the terminal event, once
    /// the stream has finalized (`None` before that point). Callers use this
    /// to persist the turn into `ResponseStateStore` without re-parsing the
    /// emitted SSE frame text.
    pub fn take_final_response(&mut self) -> Option<Value> {
        self.last_response_object.take()
    }

    /// Emitted before any upstream bytes are consumed: `response.created`
    /// then `response.in_progress`.
    pub fn start(&mut self) -> Vec<String> {
        let obj = self.response_object("in_progress", None, None);
        vec![
            self.frame("response.created", &json!({"response": obj})),
            self.frame("response.in_progress", &json!({"response": self.response_object("in_progress", None, None)})),
        ]
    }

    pub fn on_data(&mut self, data: &str) -> Vec<String> {
        if data.trim() == "[DONE]" {
            self.saw_done = true;
            return self.finalize();
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };
        self.process_chunk(&chunk)
    }

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

        if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tool_calls {
                out.extend(self.process_tool_call_delta(tc));
            }
        } else if let Some(content) = delta.get("content") {
            out.extend(self.process_text_delta(content));
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reasons.push(reason.to_string());
            out.extend(self.close_open_items(reason));
        }

        self.record_usage(chunk);
        out
    }

    fn record_usage(&mut self, chunk: &Value) {
        if let Some(usage) = chunk.get("usage") {
            self.usage = Some(usage.clone());
        }
    }

    fn text_chunks(content: &Value) -> Vec<String> {
        match content {
            Value::String(s) if !s.is_empty() => vec![s.clone()],
            Value::Object(o) => o
                .get("text")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
                .map(|t| vec![t.to_string()])
                .unwrap_or_default(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Object(o) => o.get("text").and_then(|t| t.as_str()).filter(|t| !t.is_empty()).map(str::to_string),
                    _ => {
                        tracing::warn!("skipping non-text responses content part");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn process_text_delta(&mut self, content: &Value) -> Vec<String> {
        let mut out = Vec::new();
        let chunks = Self::text_chunks(content);
        if chunks.is_empty() {
            return out;
        }

        if self.message_index.is_none() {
            let index = self.output.len();
            let id = format!("msg_{}", Uuid::new_v4().simple());
            self.output.push(json!({
                "id": id,
                "type": "message",
                "role": "assistant",
                "status": "in_progress",
                "content": [],
            }));
            self.message_index = Some(index);
            out.push(self.frame("response.output_item.added", &json!({"output_index": index, "item": self.output[index]})));
        }

        if !self.message_opened_part {
            self.message_opened_part = true;
            let index = self.message_index.unwrap();
            out.push(self.frame(
                "response.content_part.added",
                &json!({"output_index": index, "part": {"type": "output_text", "text": ""}}),
            ));
        }

        let index = self.message_index.unwrap();
        for chunk in chunks {
            if let Some(parts) = self.output[index]["content"].as_array_mut() {
                if let Some(last) = parts.last_mut().filter(|p| p["type"] == "output_text") {
                    let existing = last["text"].as_str().unwrap_or_default();
                    last["text"] = json!(format!("{existing}{chunk}"));
                } else {
                    parts.push(json!({"type": "output_text", "text": chunk}));
                }
            } else {
                self.output[index]["content"] = json!([{"type": "output_text", "text": chunk}]);
            }
            out.push(self.frame("response.output_text.delta", &json!({"output_index": index, "delta": chunk})));
        }
        out
    }

    fn process_tool_call_delta(&mut self, tc: &Value) -> Vec<String> {
        let mut out = Vec::new();
        let Some(upstream_index) = tc.get("index").and_then(|v| v.as_u64()) else {
            return out;
        };

        if !self.tool_items.contains_key(&upstream_index) {
            let output_index = self.output.len();
            let id = format!("fc_{}", Uuid::new_v4().simple());
            let call_id = tc
                .get("id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));

            self.output.push(json!({
                "id": id,
                "type": "function_call",
                "call_id": call_id,
                "name": "",
                "arguments": "",
                "status": "in_progress",
            }));
            self.tool_items.insert(upstream_index, ToolItemState { output_index, arguments: String::new() });
            out.push(self.frame("response.output_item.added", &json!({"output_index": output_index, "item": self.output[output_index]})));
        }

        if let Some(name) = tc.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str())
            && !name.is_empty()
        {
            let output_index = self.tool_items[&upstream_index].output_index;
            self.output[output_index]["name"] = json!(name);
        }

        if let Some(partial) = tc.get("function").and_then(|f| f.get("arguments")).and_then(|v| v.as_str()) {
            let state = self.tool_items.get_mut(&upstream_index).unwrap();
            state.arguments.push_str(partial);
            let output_index = state.output_index;
            self.output[output_index]["arguments"] = json!(state.arguments.clone());
            out.push(self.frame(
                "response.function_call_arguments.delta",
                &json!({"output_index": output_index, "delta": partial}),
            ));
        }

        out
    }

    fn close_open_items(&mut self, finish_reason: &str) -> Vec<String> {
        let mut out = Vec::new();
        let item_status = if finish_reason == "length" { "incomplete" } else { "completed" };

        if let Some(index) = self.message_index {
            let part = self.output[index]["content"].as_array().and_then(|a| a.first()).cloned().unwrap_or(json!({"type": "output_text", "text": ""}));
            out.push(self.frame("response.content_part.done", &json!({"output_index": index, "part": part})));
            self.output[index]["status"] = json!(item_status);
            out.push(self.frame("response.output_item.done", &json!({"output_index": index, "item": self.output[index]})));
        }
        let tool_indices: Vec<usize> = self.tool_items.values().map(|s| s.output_index).collect();
        for output_index in tool_indices {
            self.output[output_index]["status"] = json!(item_status);
            out.push(self.frame("response.output_item.done", &json!({"output_index": output_index, "item": self.output[output_index]})));
        }
        out
    }

    fn finalize(&mut self) -> Vec<String> {
        if self.finalized {
            return Vec::new();
        }
        self.finalized = true;

        let (status, event_name, error_or_incomplete) = self.terminal_status();
        let obj = self.response_object(status, error_or_incomplete.0.clone(), error_or_incomplete.1.clone());
        self.last_response_object = Some(obj.clone());
        vec![self.frame(event_name, &json!({"response": obj}))]
    }

    fn terminal_status(&self) -> (&'static str, &'static str, (Option<Value>, Option<Value>)) {
        if self.finish_reasons.iter().any(|r| r == "length") {
            let incomplete = json!({"reason": "max_output_tokens"});
            return ("incomplete", "response.incomplete", (None, Some(incomplete)));
        }
        if self.finish_reasons.iter().any(|r| r == "content_filter") {
            let error = json!({"type": "model_error", "code": "content_filter"});
            return ("failed", "response.failed", (Some(error), None));
        }
        if self.saw_done {
            return ("completed", "response.completed", (None, None));
        }
        if !self.finish_reasons.is_empty() {
            tracing::warn!("responses stream ended without [DONE] sentinel after a finish_reason");
            return ("completed", "response.completed", (None, None));
        }
        let error = json!({"type": "server_error", "code": "stream_ended_unexpectedly"});
        ("failed", "response.failed", (Some(error), None))
    }

    fn response_object(&self, status: &str, error: Option<Value>, incomplete_details: Option<Value>) -> Value {
        let mut obj = json!({
            "id": self.response_id,
            "object": "response",
            "created_at": self.created_at,
            "status": status,
            "model": self.model,
            "output": self.output,
        });
        if status != "in_progress" {
            obj["completed_at"] = json!(chrono::Utc::now().timestamp());
            obj["usage"] = self.usage.clone().unwrap_or(Value::Null);
        }
        if let Some(e) = error {
            obj["error"] = e;
        }
        if let Some(d) = incomplete_details {
            obj["incomplete_details"] = d;
        }
        if let Some(t) = &self.echo.temperature {
            obj["temperature"] = t.clone();
        }
        if let Some(t) = &self.echo.top_p {
            obj["top_p"] = t.clone();
        }
        if let Some(t) = &self.echo.max_output_tokens {
            obj["max_output_tokens"] = t.clone();
        }
        if let Some(t) = &self.echo.tools {
            obj["tools"] = t.clone();
        }
        if let Some(t) = &self.echo.tool_choice {
            obj["tool_choice"] = t.clone();
        }
        obj["previous_response_id"] = self.echo.previous_response_id.clone().map(Value::String).unwrap_or(Value::Null);
        obj["metadata"] = self.echo.metadata.clone().unwrap_or(Value::Null);
        obj
    }

    fn frame(&mut self, event_type: &str, payload: &Value) -> String {
        self.sequence_number += 1;
        let mut payload = payload.clone();
        payload["type"] = json!(event_type);
        payload["sequence_number"] = json!(self.sequence_number);
        format!("event: {event_type}\ndata: {payload}\n\n")
    }
}
