use super::*;
use crate::state::test_helpers;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    let app = app(state, Some("https://polls.example.com"));
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .expect("server failed");
    });
    addr
}

/// Minimal HTTP/1.1 GET; returns the status code and body.
async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    send(addr, format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n")).await
}

/// Minimal HTTP/1.1 JSON POST.
async fn post_json(addr: SocketAddr, path: &str, body: &str) -> (u16, String) {
    let len = body.len();
    send(
        addr,
        format!(
            "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\n\
             Content-Length: {len}\r\nConnection: close\r\n\r\n{body}"
        ),
    )
    .await
}

async fn send(addr: SocketAddr, request: String) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.expect("read");

    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status line");
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    (status, body)
}

#[tokio::test]
async fn api_error_renders_json_body() {
    let response = ApiError::new(StatusCode::CONFLICT, "you have already voted in this poll").into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body, serde_json::json!({"success": false, "message": "you have already voted in this poll"}));
}

#[test]
fn internal_error_hides_cause() {
    let err = ApiError::internal(&"connection refused");
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.message, "Server error");
}

#[tokio::test]
async fn health_endpoints_respond() {
    let state = test_helpers::test_app_state();
    let addr = spawn_server(state).await;

    let (status, _) = get(addr, "/healthz").await;
    assert_eq!(status, 200);

    let (status, body) = get(addr, "/api/health").await;
    assert_eq!(status, 200);
    assert!(body.contains(r#""status":"OK""#), "body: {body}");
    assert!(body.contains(r#""connections":0"#), "body: {body}");
}

#[tokio::test]
async fn rest_routes_are_rate_limited_but_health_is_not() {
    let mut config = test_helpers::test_config();
    config.rate_limit.max_requests = 1;
    let state = test_helpers::test_app_state_with(&config);
    let addr = spawn_server(state).await;

    // A malformed id is rejected by the handler without touching the database.
    let (first, body) = get(addr, "/api/polls/not-a-uuid").await;
    assert_eq!(first, 400);
    assert!(body.contains(r#""success":false"#), "body: {body}");

    let (second, body) = get(addr, "/api/polls/not-a-uuid").await;
    assert_eq!(second, 429);
    assert!(body.contains(r#""success":false"#), "body: {body}");

    for _ in 0..3 {
        assert_eq!(get(addr, "/healthz").await.0, 200);
        assert_eq!(get(addr, "/api/health").await.0, 200);
    }
}

#[tokio::test]
async fn extractor_rejections_use_the_error_envelope() {
    let state = test_helpers::test_app_state();
    let addr = spawn_server(state).await;

    let cases = [
        get(addr, "/api/forms/not-a-uuid").await,
        get(addr, "/api/forms/not-a-uuid/responses").await,
        get(addr, &format!("/api/polls/{}?voter_id=nope", uuid::Uuid::new_v4())).await,
        post_json(addr, "/api/polls", "{not json").await,
        post_json(addr, &format!("/api/polls/{}/vote", uuid::Uuid::new_v4()), r#"{"voter_id":7}"#).await,
    ];
    for (status, body) in cases {
        assert!((400..500).contains(&status), "status {status}, body: {body}");
        let value: serde_json::Value = serde_json::from_str(&body).expect("json error body");
        assert_eq!(value["success"], false);
        assert!(value["message"].as_str().is_some_and(|m| !m.is_empty()), "body: {body}");
    }
}
