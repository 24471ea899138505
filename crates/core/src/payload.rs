//! PayloadRewriter: the narrow set of outbound body rewrites this proxy
//! performs — a model-name rename and an optional "thinking" block
//! injection. Grounded in spirit on the teacher's `PayloadConfig` rule
//! engine (`crates/core/src/payload.rs`), but deliberately much narrower:
//! the teacher's glob-matched default/override/filter rules don't apply
//! here, there's exactly one rewrite per Backend.

use crate::backend::Backend;
use bytes::Bytes;
use serde_json::{Value, json};

/// Rewrites the outbound request body for `backend`. Returns the original
/// byte buffer unchanged when no rewrite applies or when rewriting fails,
/// so the proxy never re-serializes (and potentially reformats) a body it
/// didn't need to touch.
pub fn rewrite(raw_body: &Bytes, backend: &Backend) -> Bytes {
    if backend.target_model.is_none() && !backend.supports_reasoning {
        return raw_body.clone();
    }

    let mut value: Value = match serde_json::from_slice(raw_body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "payload rewrite: body is not valid JSON, forwarding unchanged");
            return raw_body.clone();
        }
    };

    let Some(obj) = value.as_object_mut() else {
        return raw_body.clone();
    };

    let mut changed = false;

    if let Some(target) = &backend.target_model {
        obj.insert("model".to_string(), Value::String(target.clone()));
        changed = true;
    }

    if backend.supports_reasoning {
        let has_thinking_type = obj
            .get("thinking")
            .and_then(|t| t.get("type"))
            .is_some();
        if !has_thinking_type {
            obj.insert("thinking".to_string(), json!({"type": "enabled"}));
            changed = true;
        }
    }

    if !changed {
        return raw_body.clone();
    }

    match serde_json::to_vec(&value) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            tracing::warn!(error = %e, "payload rewrite: re-serialization failed, forwarding unchanged");
            raw_body.clone()
        }
    }
}

/// Derives `Backend::target_model` from a model_params block: explicit
/// `target_model`/`forward_model` wins; else strip a leading `openai/`
/// provider prefix from `model`; else use the raw `model`.
pub fn derive_target_model(
    model: &str,
    target_model: Option<&str>,
    forward_model: Option<&str>,
) -> Option<String> {
    if let Some(explicit) = target_model {
        return Some(explicit.to_string());
    }
    if let Some(forward) = forward_model {
        return Some(forward.to_string());
    }
    if let Some(stripped) = model.strip_prefix("openai/") {
        return Some(stripped.to_string());
    }
    Some(model.to_string())
}
