//! ResponseStateStore: two-tier storage for Open Responses conversation
//! state, keyed by `response.id`, with depth-bounded chain traversal via
//! `previous_response_id`. The in-memory tier is an LRU (`moka::sync::Cache`,
//! the future-feature dependency the teacher's workspace already declares);
//! the durable tier is an optional pluggable backend, since relational
//! persistence is named an external collaborator by this spec.

use serde_json::Value;
use std::sync::Arc;

const DEFAULT_CAPACITY: u64 = 1000;
const DEFAULT_MAX_DEPTH: usize = 100;

#[derive(Debug, Clone)]
pub struct ResponseStateRecord {
    pub id: String,
    pub previous_response_id: Option<String>,
    pub model: String,
    pub status: String,
    pub input_data: Value,
    pub output_data: Value,
    pub usage: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub metadata: Option<Value>,
    /// The fully materialized response object returned to the client.
    pub response_object: Value,
}

/// An optional durable backend for `ResponseStateRecord`s. No concrete
/// implementation ships with this crate; relational persistence is an
/// external collaborator per this proxy's scope.
pub trait DurableStateBackend: Send + Sync {
    fn persist(&self, record: &ResponseStateRecord);
    fn load(&self, id: &str) -> Option<ResponseStateRecord>;
}

pub struct ResponseStateStore {
    memory: moka::sync::Cache<String, ResponseStateRecord>,
    durable: Option<Arc<dyn DurableStateBackend>>,
}

impl ResponseStateStore {
    pub fn new(capacity: u64, durable: Option<Arc<dyn DurableStateBackend>>) -> Self {
        Self {
            memory: moka::sync::Cache::new(capacity),
            durable,
        }
    }

    /// Stores a response, updating LRU recency and enqueuing a background
    /// persistence task if a durable backend is configured.
    pub fn put(&self, record: ResponseStateRecord) {
        self.memory.insert(record.id.clone(), record.clone());
        if let Some(durable) = self.durable.clone() {
            tokio::task::spawn_blocking(move || durable.persist(&record));
        }
    }

    /// Memory first, then durable (populating memory on hit).
    pub fn get(&self, id: &str) -> Option<ResponseStateRecord> {
        if let Some(record) = self.memory.get(id) {
            return Some(record);
        }
        let durable = self.durable.as_ref()?;
        let record = durable.load(id)?;
        self.memory.insert(id.to_string(), record.clone());
        Some(record)
    }

    /// Walks back via `previous_response_id`, depth-bounded, assembling
    /// each turn as `input_items(turn) + output_items(turn)` in
    /// chronological order (oldest first).
    pub fn history(&self, id: &str, max_depth: Option<usize>) -> Vec<Value> {
        let max_depth = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        let mut turns: Vec<ResponseStateRecord> = Vec::new();
        let mut cursor = Some(id.to_string());
        let mut depth = 0;

        while let Some(current_id) = cursor {
            if depth >= max_depth {
                tracing::warn!(response_id = %id, max_depth, "history traversal hit max depth");
                break;
            }
            let Some(record) = self.get(&current_id) else {
                tracing::warn!(response_id = %current_id, "history chain broken: missing link");
                break;
            };
            cursor = record.previous_response_id.clone();
            turns.push(record);
            depth += 1;
        }

        turns.reverse();

        let mut items = Vec::new();
        for turn in &turns {
            match &turn.input_data {
                Value::Array(arr) => items.extend(arr.iter().cloned()),
                other if !other.is_null() => items.push(other.clone()),
                _ => {}
            }
            match &turn.output_data {
                Value::Array(arr) => items.extend(arr.iter().cloned()),
                other if !other.is_null() => items.push(other.clone()),
                _ => {}
            }
        }
        items
    }
}

pub fn default_capacity() -> u64 {
    DEFAULT_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, prev: Option<&str>, input: Value, output: Value) -> ResponseStateRecord {
        ResponseStateRecord {
            id: id.to_string(),
            previous_response_id: prev.map(String::from),
            model: "alpha".into(),
            status: "completed".into(),
            input_data: input,
            output_data: output,
            usage: json!({}),
            created_at: chrono::Utc::now(),
            metadata: None,
            response_object: json!({}),
        }
    }

    #[test]
    fn history_is_chronological_and_concatenates_turns() {
        let store = ResponseStateStore::new(default_capacity(), None);
        store.put(record("resp_1", None, json!("A"), json!("B")));
        store.put(record("resp_2", Some("resp_1"), json!("C"), json!("D")));

        let history = store.history("resp_2", None);
        assert_eq!(history, vec![json!("A"), json!("B"), json!("C"), json!("D")]);
    }

    #[test]
    fn broken_chain_link_stops_traversal_without_panicking() {
        let store = ResponseStateStore::new(default_capacity(), None);
        store.put(record("resp_2", Some("resp_missing"), json!("C"), json!("D")));
        let history = store.history("resp_2", None);
        assert_eq!(history, vec![json!("C"), json!("D")]);
    }

    #[test]
    fn depth_bound_prevents_runaway_traversal() {
        let store = ResponseStateStore::new(default_capacity(), None);
        store.put(record("resp_0", None, json!("start"), json!("out0")));
        for i in 1..10 {
            store.put(record(
                &format!("resp_{i}"),
                Some(&format!("resp_{}", i - 1)),
                json!(format!("in{i}")),
                json!(format!("out{i}")),
            ));
        }
        let history = store.history("resp_9", Some(3));
        // only the last 3 turns should be walked
        assert_eq!(history.len(), 6);
    }
}
