//! Shared HTTP-execution helpers for the Router, grounded on the teacher's
//! `crates/provider/src/common.rs` (`build_client`/`handle_response`/
//! `handle_stream_response`) but adapted to this proxy's single-backend
//! `Backend` model instead of the teacher's multi-format `AuthRecord`.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

pub const RETRYABLE_STATUSES: [u16; 7] = [408, 409, 429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// `min(base * 2^(attempt-1), cap)`, `base=0.25s`, `cap=2.0s`. `attempt` is
/// 1-based (the attempt number that just failed).
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    (Duration::from_millis(250) * factor).min(Duration::from_secs(2))
}

pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().build()
}

pub fn extract_headers(resp: &reqwest::Response) -> Vec<(String, String)> {
    resp.headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

pub fn parse_retry_after(headers: &[(String, String)]) -> Option<u64> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, v)| v.parse::<u64>().ok())
}

/// Collapses a `/v1` suffix on the base URL against a `/v1` prefix on the
/// request path, per the Router's URL-building rule: only an exact `/v1`
/// on both sides collapses, nothing else (e.g. `/v1beta` does not).
pub fn build_url(base_url: &str, path: &str, query: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let (base, path) = if base.ends_with("/v1") && (path == "/v1" || path.starts_with("/v1/")) {
        (&base[..base.len() - 3], &path[3..])
    } else {
        (base, path)
    };
    let mut url = format!("{base}{path}");
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

pub fn headers_to_map(headers: &[(String, String)]) -> HashMap<String, String> {
    headers.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_exact_v1_prefix() {
        assert_eq!(build_url("https://api.example.com/v1", "/v1/chat/completions", ""), "https://api.example.com/chat/completions");
    }

    #[test]
    fn does_not_collapse_v1beta() {
        assert_eq!(build_url("https://api.example.com/v1", "/v1beta/models", ""), "https://api.example.com/v1/v1beta/models");
    }

    #[test]
    fn appends_query_string() {
        assert_eq!(build_url("https://api.example.com", "/models", "limit=5"), "https://api.example.com/models?limit=5");
    }

    #[test]
    fn backoff_delay_is_exponential_and_capped() {
        assert_eq!(backoff_delay(1), Duration::from_millis(250));
        assert_eq!(backoff_delay(2), Duration::from_millis(500));
        assert_eq!(backoff_delay(3), Duration::from_millis(1000));
        assert_eq!(backoff_delay(4), Duration::from_millis(2000));
        assert_eq!(backoff_delay(10), Duration::from_millis(2000));
    }

    #[test]
    fn retryable_status_set_matches_spec() {
        for s in [408, 409, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(s));
        }
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }
}
