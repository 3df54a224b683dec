//! Router-level tests against a scripted upstream.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{header, Request, StatusCode};
use orion_backend::mock::fixtures;
use orion_backend::{MockConfig, MockUpstream};
use orion_protocol::{ChatMessage, ChatRequest, ErrorBody, ErrorKind, Role};
use orion_relay::config::{AgentProfile, Config, DEFAULT_SYSTEM_PROMPT};
use orion_relay::{router, AppState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

fn app_with(config: Config, mock: MockConfig) -> (Router, MockUpstream) {
    let upstream = MockUpstream::new(mock);
    let app = router(AppState::new(config, Arc::new(upstream.clone())));
    (app, upstream)
}

fn app(mock: MockConfig) -> (Router, MockUpstream) {
    app_with(Config::default(), mock)
}

fn chat_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn json_request(request: &ChatRequest) -> Request<Body> {
    chat_request(serde_json::to_vec(request).unwrap())
}

fn hello() -> ChatRequest {
    ChatRequest::new(vec![ChatMessage::user("Hi")])
}

async fn error_body(response: axum::response::Response) -> ErrorBody {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = app(MockConfig::new());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn streams_concatenated_deltas() {
    let (app, _) = app(fixtures::streaming_text(&["Hel", "lo!"]));
    let response = app.oneshot(json_request(&hello())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], "Hello!".as_bytes());
}

#[tokio::test]
async fn split_upstream_reads_give_same_body() {
    let chunks = ["Bom ", "dia, ", "Ö", "rion ", "🚀"];
    for size in [1, 3, 17] {
        let (app, _) = app(fixtures::streaming_text_split(&chunks, size));
        let response = app.oneshot(json_request(&hello())).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "Bom dia, Örion 🚀",
            "size {size}"
        );
    }
}

#[tokio::test]
async fn system_prompt_is_prepended_and_history_kept_in_order() {
    let (app, upstream) = app(fixtures::streaming_text(&["ok"]));
    let history = vec![
        ChatMessage::user("first"),
        ChatMessage::assistant("reply"),
        ChatMessage::user("second"),
    ];
    let response = app
        .oneshot(json_request(&ChatRequest::new(history.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system, DEFAULT_SYSTEM_PROMPT);
    assert_eq!(requests[0].messages, history);
    assert_eq!(requests[0].model, "gpt-4o-mini");
}

#[tokio::test]
async fn agent_profile_overrides_defaults() {
    let mut config = Config::default();
    config.agents.insert(
        "poet".to_string(),
        AgentProfile {
            name: Some("Poet".to_string()),
            system_prompt: Some("Answer in verse.".to_string()),
            model: Some("gpt-4o".to_string()),
            temperature: Some(1.1),
            max_tokens: None,
        },
    );
    let (app, upstream) = app_with(config, fixtures::streaming_text(&["ok"]));

    let request = hello().with_agent("poet");
    app.oneshot(json_request(&request)).await.unwrap();

    let sent = &upstream.requests()[0];
    assert_eq!(sent.system, "Answer in verse.");
    assert_eq!(sent.model, "gpt-4o");
    assert_eq!(sent.temperature, 1.1);
    assert_eq!(sent.max_tokens, 2048);
}

#[tokio::test]
async fn unknown_agent_uses_default_profile() {
    let (app, upstream) = app(fixtures::streaming_text(&["ok"]));
    let response = app
        .oneshot(json_request(&hello().with_agent("nobody")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.requests()[0].system, DEFAULT_SYSTEM_PROMPT);
}

#[tokio::test]
async fn upstream_rate_limit_maps_to_429() {
    let (app, _) = app(fixtures::rate_limited());
    let response = app.oneshot(json_request(&hello())).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = error_body(response).await;
    assert_eq!(body.kind, ErrorKind::RateLimited);
    assert!(!body.error.is_empty());
}

#[tokio::test]
async fn exhausted_quota_maps_to_402() {
    let mock = MockConfig::new().with_status(
        429,
        r#"{"error":{"message":"You exceeded your current quota","code":"insufficient_quota"}}"#,
    );
    let (app, _) = app(mock);
    let response = app.oneshot(json_request(&hello())).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(error_body(response).await.kind, ErrorKind::QuotaExceeded);
}

#[tokio::test]
async fn other_upstream_failures_map_to_502() {
    let mock = MockConfig::new().with_status(503, "upstream exploded: secret detail");
    let (app, _) = app(mock);
    let response = app.oneshot(json_request(&hello())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = error_body(response).await;
    assert_eq!(body.kind, ErrorKind::UpstreamError);
    assert!(!body.error.contains("secret detail"));
}

#[tokio::test]
async fn malformed_json_is_invalid_request() {
    let (app, upstream) = app(fixtures::streaming_text(&["never"]));
    let response = app.oneshot(chat_request("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.kind, ErrorKind::InvalidRequest);
    assert!(upstream.requests().is_empty());
}

#[tokio::test]
async fn unknown_role_is_invalid_request() {
    let (app, _) = app(fixtures::streaming_text(&["never"]));
    let body = r#"{"messages":[{"role":"system","content":"hi"}]}"#;
    let response = app.oneshot(chat_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_history_is_invalid_request() {
    let (app, upstream) = app(fixtures::streaming_text(&["never"]));
    let response = app
        .oneshot(json_request(&ChatRequest::new(Vec::new())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.kind, ErrorKind::InvalidRequest);
    assert!(upstream.requests().is_empty());
}

#[tokio::test]
async fn local_rate_limit_rejects_with_retry_after() {
    let mut config = Config::default();
    config.limits.per_minute = 1;
    let upstream = MockUpstream::new(fixtures::streaming_text(&["ok"]));
    let app = router(AppState::new(config, Arc::new(upstream.clone())));

    let authed = || {
        let mut request = json_request(&hello());
        request.headers_mut().insert(
            header::AUTHORIZATION,
            "Bearer session-token".parse().unwrap(),
        );
        request
    };

    let first = app.clone().oneshot(authed()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(authed()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = error_body(second).await;
    assert_eq!(body.kind, ErrorKind::RateLimited);
    assert!(body.retry_after.is_some_and(|secs| secs >= 1));
    assert_eq!(upstream.requests().len(), 1);
}

#[tokio::test]
async fn disabled_limiter_lets_everything_through() {
    let mut config = Config::default();
    config.limits.enabled = false;
    config.limits.anonymous_per_minute = 0;
    let (app, _) = app_with(config, fixtures::streaming_text(&["ok"]));

    for _ in 0..3 {
        let response = app.clone().oneshot(json_request(&hello())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn mid_stream_failure_aborts_body() {
    let (app, _) = app(fixtures::error_mid_stream("Part", "connection reset"));
    let response = app.oneshot(json_request(&hello())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn missing_sentinel_aborts_body() {
    let (app, _) = app(fixtures::missing_sentinel(&["Hel", "lo"]));
    let response = app.oneshot(json_request(&hello())).await.unwrap();
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
}

/// Serve `mock` on a real socket, post one chat request and return the
/// raw HTTP/1.1 response bytes received before the connection ended.
async fn served_response(mock: MockConfig) -> String {
    let (app, _) = app(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let body = serde_json::to_string(&hello()).unwrap();
    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST /api/chat HTTP/1.1\r\nhost: {addr}\r\nconnection: close\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await.unwrap();
    socket.write_all(body.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    let read_all = async {
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), read_all)
        .await
        .expect("relay kept the connection open");
    String::from_utf8_lossy(&received).into_owned()
}

#[tokio::test]
async fn aborted_stream_still_delivers_head_and_partial_text() {
    let cases = [
        fixtures::error_mid_stream("Part", "connection reset"),
        fixtures::missing_sentinel(&["Part"]),
        fixtures::provider_error_after("Part", "overloaded"),
    ];
    for mock in cases {
        let raw = served_response(mock).await;
        assert!(raw.starts_with("HTTP/1.1 200 OK"), "{raw}");
        assert!(raw.contains("Part"), "{raw}");
        assert!(!raw.contains("never"), "{raw}");
        // No terminating zero-length chunk: the body was cut off.
        assert!(!raw.ends_with("0\r\n\r\n"), "{raw}");
    }
}

#[tokio::test]
async fn completed_stream_ends_with_final_chunk() {
    let raw = served_response(fixtures::streaming_text(&["Hel", "lo!"])).await;
    assert!(raw.starts_with("HTTP/1.1 200 OK"), "{raw}");
    assert!(raw.contains("Hel") && raw.contains("lo!"), "{raw}");
    assert!(raw.ends_with("0\r\n\r\n"), "{raw}");
}

#[tokio::test]
async fn assistant_history_is_forwarded_with_roles() {
    let (app, upstream) = app(fixtures::streaming_text(&["ok"]));
    let body = r#"{"messages":[{"role":"user","content":"a"},{"role":"assistant","content":"b"},{"role":"user","content":"c"}]}"#;
    app.oneshot(chat_request(body)).await.unwrap();

    let roles: Vec<Role> = upstream.requests()[0]
        .messages
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
}
