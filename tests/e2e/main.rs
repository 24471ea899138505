//! End-to-end tests driving the assembled axum router in-process against a
//! `wiremock` stand-in upstream, grounded on the teacher's
//! `crates/server/tests/dashboard_tests.rs` harness shape (a real `AppState`
//! exercised via `tower::ServiceExt::oneshot`), adapted to this proxy's
//! simpler `Backend`/`BackendRegistry` wiring.

use ai_proxy_core::backend::{Backend, BackendRegistry};
use ai_proxy_core::config::Config;
use ai_proxy_core::metrics::Metrics;
use ai_proxy_core::state_store::{self, ResponseStateStore};
use ai_proxy_provider::Router as BackendRouter;
use ai_proxy_server::{AppState, build_router};
use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_state(registry: BackendRegistry) -> AppState {
    AppState {
        config: Arc::new(ArcSwap::from_pointee(Config::default())),
        registry: Arc::new(registry),
        router: Arc::new(BackendRouter::new().expect("router")),
        state_store: Arc::new(ResponseStateStore::new(state_store::default_capacity(), None)),
        metrics: Arc::new(Metrics::new()),
        start_time: Instant::now(),
    }
}

fn backend(name: &str, base_url: &str) -> Backend {
    Backend {
        name: name.to_string(),
        base_url: base_url.to_string(),
        api_key: None,
        timeout_seconds: None,
        target_model: None,
        supports_reasoning: false,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    serde_json::from_slice(&bytes).expect("valid json body")
}

#[tokio::test]
async fn health_reports_ok_without_touching_any_backend() {
    let state = test_state(BackendRegistry::new(vec![], Default::default()));
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_completions_forwards_to_configured_backend() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "alpha",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        })))
        .mount(&upstream)
        .await;

    let registry = BackendRegistry::new(vec![backend("alpha", &upstream.uri())], Default::default());
    let state = test_state(registry);
    let metrics = state.metrics.clone();
    let app = build_router(state);

    let payload = json!({"model": "alpha", "messages": [{"role": "user", "content": "hello"}]});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "hi");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot["total_requests"], 1);
    assert_eq!(snapshot["total_input_tokens"], 3);
}

#[tokio::test]
async fn chat_completions_rejects_unknown_model_as_bad_request() {
    let state = test_state(BackendRegistry::new(vec![], Default::default()));
    let app = build_router(state);

    let payload = json!({"model": "ghost", "messages": [{"role": "user", "content": "hi"}]});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn messages_endpoint_translates_anthropic_request_and_response() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "model": "alpha",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7},
        })))
        .mount(&upstream)
        .await;

    let registry = BackendRegistry::new(vec![backend("alpha", &upstream.uri())], Default::default());
    let app = build_router(test_state(registry));

    let payload = json!({
        "model": "alpha",
        "max_tokens": 128,
        "messages": [{"role": "user", "content": "hi"}],
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["type"], "message");
    assert_eq!(body["content"][0]["text"], "hello there");
}

#[tokio::test]
async fn retryable_primary_failure_falls_back_to_the_next_backend() {
    let primary = MockServer::start().await;
    Mock::given(method("POST")).and(path("/chat/completions")).respond_with(ResponseTemplate::new(503)).mount(&primary).await;

    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-fb",
            "object": "chat.completion",
            "model": "alpha",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "from fallback"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2},
        })))
        .mount(&fallback)
        .await;

    let mut fallbacks = std::collections::HashMap::new();
    fallbacks.insert("alpha".to_string(), vec!["beta".to_string()]);
    let registry = BackendRegistry::new(vec![backend("alpha", &primary.uri()), backend("beta", &fallback.uri())], fallbacks);
    let app = build_router(test_state(registry));

    let payload = json!({"model": "alpha", "messages": [{"role": "user", "content": "hi"}]});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "from fallback");
}

#[tokio::test]
async fn all_backends_failing_returns_bad_gateway() {
    let primary = MockServer::start().await;
    Mock::given(method("POST")).and(path("/chat/completions")).respond_with(ResponseTemplate::new(500)).mount(&primary).await;

    let fallback = MockServer::start().await;
    Mock::given(method("POST")).and(path("/chat/completions")).respond_with(ResponseTemplate::new(503)).mount(&fallback).await;

    let mut fallbacks = std::collections::HashMap::new();
    fallbacks.insert("alpha".to_string(), vec!["beta".to_string()]);
    let registry = BackendRegistry::new(vec![backend("alpha", &primary.uri()), backend("beta", &fallback.uri())], fallbacks);
    let state = test_state(registry);
    let metrics = state.metrics.clone();
    let app = build_router(state);

    let payload = json!({"model": "alpha", "messages": [{"role": "user", "content": "hi"}]});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot["total_errors"], 1);
    // A round trip that returns (even by failure) records latency, not just
    // requests/errors counters.
    assert!(snapshot["avg_latency_ms"].as_f64().unwrap() >= 0.0);
    let buckets: u64 = snapshot["latency_buckets"].as_array().unwrap().iter().map(|v| v.as_u64().unwrap()).sum();
    assert_eq!(buckets, 1);
}

#[tokio::test]
async fn streaming_chat_completion_forwards_sse_frames_and_records_decoded_text() {
    let upstream = MockServer::start().await;
    let sse_body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                     data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body.to_string(), "text/event-stream"))
        .mount(&upstream)
        .await;

    let registry = BackendRegistry::new(vec![backend("alpha", &upstream.uri())], Default::default());
    let app = build_router(test_state(registry));

    let payload = json!({"model": "alpha", "stream": true, "messages": [{"role": "user", "content": "hi"}]});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read streamed body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8 stream body");
    assert!(text.contains("Hello") || (text.contains("Hel") && text.contains("lo")));
}

#[tokio::test]
async fn responses_endpoint_threads_history_across_previous_response_id() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-r1",
            "object": "chat.completion",
            "model": "alpha",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "B"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2},
        })))
        .mount(&upstream)
        .await;

    let registry = BackendRegistry::new(vec![backend("alpha", &upstream.uri())], Default::default());
    let mut config = Config::default();
    config.general_settings.enable_responses_endpoint = true;
    let state = AppState { config: Arc::new(ArcSwap::from_pointee(config)), ..test_state(registry) };
    let app = build_router(state);

    let first_payload = json!({"model": "alpha", "input": "A"});
    let first_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/responses")
                .header("content-type", "application/json")
                .body(Body::from(first_payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first_response.status(), StatusCode::OK);
    let first_body = body_json(first_response).await;
    let previous_response_id = first_body["id"].as_str().unwrap().to_string();

    let second_payload = json!({"model": "alpha", "input": "C", "previous_response_id": previous_response_id});
    let second_response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/responses")
                .header("content-type", "application/json")
                .body(Body::from(second_payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second_response.status(), StatusCode::OK);
    let second_body = body_json(second_response).await;
    assert_eq!(second_body["output"][0]["content"][0]["text"], "B");
    assert_eq!(second_body["previous_response_id"], previous_response_id);

    // The second upstream call must carry the full thread — the bare-string
    // first turn's text included, not silently dropped.
    let received = upstream.received_requests().await.expect("request journal enabled");
    let second_upstream_body: Value = serde_json::from_slice(&received[1].body).expect("valid json");
    let contents: Vec<&str> = second_upstream_body["messages"].as_array().unwrap().iter().filter_map(|m| m["content"].as_str()).collect();
    assert!(contents.contains(&"A"));
    assert!(contents.contains(&"C"));
}

#[tokio::test]
async fn admin_register_then_route_to_the_new_model() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-3",
            "object": "chat.completion",
            "model": "runtime-model",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2},
        })))
        .mount(&upstream)
        .await;

    let app = build_router(test_state(BackendRegistry::new(vec![], Default::default())));

    let register_payload = json!({"model_name": "runtime-model", "api_base": upstream.uri()});
    let register_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/models")
                .header("content-type", "application/json")
                .body(Body::from(register_payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(register_response.status(), StatusCode::OK);

    let chat_payload = json!({"model": "runtime-model", "messages": [{"role": "user", "content": "hi"}]});
    let chat_response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(chat_payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(chat_response.status(), StatusCode::OK);
    let body = body_json(chat_response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "ok");
}
