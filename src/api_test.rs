use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde_json::json;

use super::*;
use crate::store::MemoryUserStore;
use crate::user::test_helpers::sample_record;

#[derive(Default)]
struct CountingReset(AtomicUsize);

impl SessionReset for CountingReset {
    fn reset(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingReset {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn profile(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let expected = sample_record("ann@example.com").id_token().map(str::to_owned);
    match header_token(&headers) {
        Some(token) if Some(&token) == expected.as_ref() => {
            (StatusCode::OK, Json(json!({ "email": "ann@example.com", "plan": "pro" })))
        }
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid token" }))),
    }
}

async fn echo(headers: HeaderMap, body: String) -> Json<Value> {
    let body = serde_json::from_str::<Value>(&body).ok();
    Json(json!({ "token": header_token(&headers), "body": body }))
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route(PROFILE_PATH, post(profile))
        .route("/echo", get(echo).post(echo))
        .route("/boom", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
        .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route("/text", get(|| async { "plain text" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn client(base_url: &str, store: Arc<MemoryUserStore>, reset: Arc<CountingReset>) -> ApiClient {
    ApiClient::new(base_url, HttpTimeouts::default(), store, reset).unwrap()
}

#[tokio::test]
async fn sends_stored_id_token_in_token_header() {
    let base = spawn_backend().await;
    let store = Arc::new(MemoryUserStore::new());
    let user = sample_record("ann@example.com");
    store.write(&user).unwrap();
    let api = client(&base, store, Arc::default());

    let echoed = api.get("/echo").await.unwrap();
    assert_eq!(echoed["token"].as_str(), user.id_token());
}

#[tokio::test]
async fn omits_token_header_without_stored_user() {
    let base = spawn_backend().await;
    let api = client(&base, Arc::new(MemoryUserStore::new()), Arc::default());

    let echoed = api.get("echo").await.unwrap();
    assert!(echoed["token"].is_null());
}

#[tokio::test]
async fn omits_token_header_for_placeholder_or_garbage_entry() {
    let base = spawn_backend().await;
    for raw in ["null", "{not json"] {
        let api = client(&base, Arc::new(MemoryUserStore::with_raw(raw)), Arc::default());
        let echoed = api.get("/echo").await.unwrap();
        assert!(echoed["token"].is_null(), "entry {raw:?} should not produce a token");
    }
}

#[tokio::test]
async fn post_sends_json_body() {
    let base = spawn_backend().await;
    let api = client(&base, Arc::new(MemoryUserStore::new()), Arc::default());

    let echoed = api.post("/echo", &json!({ "page": 2 })).await.unwrap();
    assert_eq!(echoed["body"]["page"], 2);
}

#[tokio::test]
async fn fetch_user_profile_with_valid_token() {
    let base = spawn_backend().await;
    let store = Arc::new(MemoryUserStore::new());
    store.write(&sample_record("ann@example.com")).unwrap();
    let reset = Arc::new(CountingReset::default());
    let api = client(&base, store.clone(), reset.clone());

    let profile = api.fetch_user_profile().await.unwrap();
    assert_eq!(profile["plan"], "pro");
    assert_eq!(reset.count(), 0);
    assert!(store.raw().is_some());
}

#[tokio::test]
async fn unauthorized_clears_store_and_resets_once() {
    let base = spawn_backend().await;
    let store = Arc::new(MemoryUserStore::new());
    store.write(&sample_record("someone-else@example.com")).unwrap();
    let reset = Arc::new(CountingReset::default());
    let api = client(&base, store.clone(), reset.clone());

    let err = api.fetch_user_profile().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert!(store.raw().is_none());
    assert_eq!(reset.count(), 1);
}

/// Answers every request with a 401 whose body is cut short.
async fn spawn_truncated_unauthorized() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = socket
                .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 64\r\nconnection: close\r\n\r\n{\"err")
                .await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn unauthorized_resets_even_when_body_is_cut_short() {
    let base = spawn_truncated_unauthorized().await;
    let store = Arc::new(MemoryUserStore::new());
    store.write(&sample_record("ann@example.com")).unwrap();
    let reset = Arc::new(CountingReset::default());
    let api = client(&base, store.clone(), reset.clone());

    let err = api.fetch_user_profile().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert!(store.raw().is_none());
    assert_eq!(reset.count(), 1);
}

#[tokio::test]
async fn other_failures_leave_session_alone() {
    let base = spawn_backend().await;
    let store = Arc::new(MemoryUserStore::new());
    store.write(&sample_record("ann@example.com")).unwrap();
    let reset = Arc::new(CountingReset::default());
    let api = client(&base, store.clone(), reset.clone());

    let err = api.get("/boom").await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 500, ref body, .. } if body == "boom"));
    assert_eq!(reset.count(), 0);
    assert!(store.raw().is_some());
}

#[tokio::test]
async fn empty_body_decodes_to_null() {
    let base = spawn_backend().await;
    let api = client(&base, Arc::new(MemoryUserStore::new()), Arc::default());
    assert_eq!(api.get("/empty").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn non_json_body_is_a_decode_error() {
    let base = spawn_backend().await;
    let api = client(&base, Arc::new(MemoryUserStore::new()), Arc::default());
    assert!(matches!(api.get("/text").await.unwrap_err(), ApiError::Decode { .. }));
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let api = client("http://127.0.0.1:9", Arc::new(MemoryUserStore::new()), Arc::default());
    let err = api.get("/echo").await.unwrap_err();
    assert!(matches!(err, ApiError::Request { .. }));
}

#[tokio::test]
async fn base_url_trailing_slash_is_trimmed() {
    let api = client("http://localhost:8080/", Arc::new(MemoryUserStore::new()), Arc::default());
    assert_eq!(api.base_url(), "http://localhost:8080");
    assert_eq!(api.url("/a"), "http://localhost:8080/a");
    assert_eq!(api.url("a"), "http://localhost:8080/a");
}
