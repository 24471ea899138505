//! Recorder: a per-request append-only log, finalized exactly once and
//! flushed to disk on a background task. Distinct from the teacher's
//! `RequestLogStore` (`crates/core/src/request_log.rs`), which is a ring
//! buffer feeding a dashboard — that mechanism is out of this spec's scope.
//! This Recorder is built fresh, grounded on the teacher's general
//! "typed record methods + finalize" shape but with its own persistence
//! rule (atomic write-to-temp-then-rename per request, tracked in a
//! process-global pending-flush set so shutdown can drain it).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendAttempt {
    pub backend_name: String,
    pub attempt_number: u32,
    pub url: String,
    pub status: Option<u16>,
    pub response_headers: Vec<(String, String)>,
    pub body_or_chunk_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestLogRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub model_name: String,
    pub is_stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub request: RequestLogRequest,
    pub route: Vec<String>,
    pub attempts: Vec<BackendAttempt>,
    pub outcome: Option<Outcome>,
    pub error_message: Option<String>,
    pub stream_chunk_count: u64,
    pub full_response_text: String,
}

struct RecorderInner {
    log: RequestLog,
    finalized: bool,
    log_dir: PathBuf,
}

/// Per-request append-only log buffer. Thread-confined to the owning
/// request until `finalize`, after which the spawned flush task
/// exclusively owns the buffer.
#[derive(Clone)]
pub struct Recorder {
    inner: std::sync::Arc<Mutex<RecorderInner>>,
}

impl Recorder {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            inner: std::sync::Arc::new(Mutex::new(RecorderInner {
                log: RequestLog {
                    id,
                    started_at: Utc::now(),
                    request: RequestLogRequest::default(),
                    route: Vec::new(),
                    attempts: Vec::new(),
                    outcome: None,
                    error_message: None,
                    stream_chunk_count: 0,
                    full_response_text: String::new(),
                },
                finalized: false,
                log_dir: log_dir.into(),
            })),
        }
    }

    pub fn id(&self) -> String {
        self.inner.lock().expect("recorder lock poisoned").log.id.clone()
    }

    pub fn record_request(&self, request: RequestLogRequest) {
        self.with_inner(|inner| inner.log.request = request);
    }

    pub fn record_route(&self, names: Vec<String>) {
        self.with_inner(|inner| inner.log.route = names);
    }

    pub fn record_backend_attempt(&self, backend_name: &str, attempt_number: u32, url: &str) {
        self.with_inner(|inner| {
            inner.log.attempts.push(BackendAttempt {
                backend_name: backend_name.to_string(),
                attempt_number,
                url: url.to_string(),
                status: None,
                response_headers: Vec::new(),
                body_or_chunk_count: None,
            })
        });
    }

    pub fn record_backend_response(
        &self,
        status: u16,
        response_headers: Vec<(String, String)>,
        body_or_chunk_count: u64,
    ) {
        self.with_inner(|inner| {
            if let Some(last) = inner.log.attempts.last_mut() {
                last.status = Some(status);
                last.response_headers = response_headers;
                last.body_or_chunk_count = Some(body_or_chunk_count);
            }
        });
    }

    pub fn record_stream_headers(&self, headers: Vec<(String, String)>) {
        self.with_inner(|inner| {
            if let Some(last) = inner.log.attempts.last_mut() {
                last.response_headers = headers;
            }
        });
    }

    pub fn record_stream_chunk(&self, chunk_len: usize, decoded_text: Option<&str>) {
        self.with_inner(|inner| {
            inner.log.stream_chunk_count += 1;
            if let Some(last) = inner.log.attempts.last_mut() {
                let count = last.body_or_chunk_count.unwrap_or(0);
                last.body_or_chunk_count = Some(count + chunk_len as u64);
            }
            if let Some(text) = decoded_text {
                inner.log.full_response_text.push_str(text);
            }
        });
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.with_inner(|inner| inner.log.error_message = Some(message.into()));
    }

    /// Finalizes the recorder exactly once and schedules a background
    /// flush of the accumulated buffer to disk. Subsequent calls are
    /// no-ops.
    pub fn finalize(&self, outcome: Outcome) {
        let (log, log_dir, should_flush) = {
            let mut inner = self.inner.lock().expect("recorder lock poisoned");
            if inner.finalized {
                (inner.log.clone(), inner.log_dir.clone(), false)
            } else {
                inner.finalized = true;
                inner.log.outcome = Some(outcome);
                (inner.log.clone(), inner.log_dir.clone(), true)
            }
        };
        if !should_flush {
            return;
        }

        let handle = tokio::spawn(async move {
            if let Err(e) = flush_to_disk(&log, &log_dir).await {
                tracing::error!(request_id = %log.id, error = %e, "failed to flush request log");
            }
        });
        register_pending_flush(handle);
    }

    /// Snapshot of the archival text accumulated so far. Exposed for tests
    /// that assert on what a stream recorded, not used on the request path.
    pub fn full_response_text(&self) -> String {
        self.inner.lock().expect("recorder lock poisoned").log.full_response_text.clone()
    }

    fn with_inner(&self, f: impl FnOnce(&mut RecorderInner)) {
        let mut inner = self.inner.lock().expect("recorder lock poisoned");
        if inner.finalized {
            return;
        }
        f(&mut inner);
    }
}

/// Sanitizes a model name for use in a filename: keeps
/// `[A-Za-z0-9_-]`, collapses runs, truncates to 48 chars.
pub fn sanitize_model_name(model: &str) -> String {
    let mut out = String::with_capacity(model.len());
    let mut last_was_sep = false;
    for c in model.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    trimmed.chars().take(48).collect()
}

fn log_file_name(log: &RequestLog) -> String {
    let ts = log.started_at.format("%Y%m%dT%H%M%S%.3fZ");
    let short_uuid: String = log.id.chars().filter(|c| *c != '-').take(8).collect();
    let model = sanitize_model_name(&log.request.model_name);
    format!("{ts}-{short_uuid}_{model}.log")
}

async fn flush_to_disk(log: &RequestLog, log_dir: &std::path::Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(log_dir).await?;
    let contents = serde_json::to_vec_pretty(log).unwrap_or_default();
    let final_path = log_dir.join(log_file_name(log));
    let tmp_path = final_path.with_extension("log.tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}

static PENDING_FLUSHES: OnceLock<Mutex<Vec<tokio::task::JoinHandle<()>>>> = OnceLock::new();

fn pending_flushes() -> &'static Mutex<Vec<tokio::task::JoinHandle<()>>> {
    PENDING_FLUSHES.get_or_init(|| Mutex::new(Vec::new()))
}

fn register_pending_flush(handle: tokio::task::JoinHandle<()>) {
    let mut guard = pending_flushes().lock().expect("pending-flush lock poisoned");
    guard.retain(|h| !h.is_finished());
    guard.push(handle);
}

/// Awaits all flush tasks registered since the process started. Called
/// during graceful shutdown so log files are never truncated.
pub async fn await_all_pending_flushes() {
    let handles: Vec<_> = {
        let mut guard = pending_flushes().lock().expect("pending-flush lock poisoned");
        std::mem::take(&mut *guard)
    };
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_and_truncates_model_name() {
        assert_eq!(sanitize_model_name("gpt-4o/mini:v2"), "gpt-4o_mini_v2");
        let long = "a".repeat(80);
        assert_eq!(sanitize_model_name(&long).len(), 48);
    }

    #[tokio::test]
    async fn finalize_is_idempotent_and_flushes_once() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path());
        recorder.record_request(RequestLogRequest {
            model_name: "alpha".into(),
            ..Default::default()
        });
        recorder.finalize(Outcome::Success);
        recorder.finalize(Outcome::Error); // no-op: already finalized
        await_all_pending_flushes().await;

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn record_methods_are_noop_after_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path());
        recorder.finalize(Outcome::Success);
        recorder.record_error("too late");
        let inner = recorder.inner.lock().unwrap();
        assert!(inner.log.error_message.is_none());
    }
}
