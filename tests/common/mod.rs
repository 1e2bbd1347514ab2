//! Shared test utilities: an in-process mock upstream and router helpers.
//! Each test file compiles this module separately, so not every item is used
//! everywhere.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Request, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use subtitle_relay::{AppState, Config, create_router};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const TEST_API_KEY: &str = "test-key";
pub const BOUNDARY: &str = "relay-test-boundary";

/// Serves `router` on an ephemeral local port and returns its address.
/// `build` receives the base URL (`http://127.0.0.1:<port>`).
pub async fn spawn_upstream(build: impl FnOnce(String) -> Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock upstream");
    let addr = listener.local_addr().expect("Mock upstream has no address");
    let router = build(format!("http://{addr}"));

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Mock upstream stopped");
    });

    addr
}

#[derive(Clone, Default)]
struct MockState {
    hits: Arc<AtomicUsize>,
}

/// The relay router wired to a mock OpenSubtitles API.
pub struct TestApp {
    pub router: Router,
    pub upstream_hits: Arc<AtomicUsize>,
    temp_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let state = MockState::default();
        let hits = state.hits.clone();
        let addr = spawn_upstream(move |_| mock_opensubtitles(state)).await;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = Config::new(TEST_API_KEY);
        config.base_url = format!("http://{addr}/api/v1");
        config.use_system_proxy = false;
        config.upload_dir = temp_dir.path().join("uploads");

        let state = AppState::new(config).expect("Failed to build app state");

        Self {
            router: create_router(state),
            upstream_hits: hits,
            temp_dir,
        }
    }

    pub fn upstream_hits(&self) -> usize {
        self.upstream_hits.load(Ordering::SeqCst)
    }

    /// Number of files left in the upload directory.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.temp_dir.path().join("uploads"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");

        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, headers, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let (status, _, json) = self.send(request).await;
        (status, json)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let (status, _, json) = self.send(request).await;
        (status, json)
    }

    pub async fn post_multipart(&self, uri: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        let (status, _, json) = self.send(request).await;
        (status, json)
    }
}

/// One multipart form part: field name, optional file name, content.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n",
                        part.name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            }
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Deterministic fake video content.
pub fn sample_video(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn mock_opensubtitles(state: MockState) -> Router {
    Router::new()
        .route("/api/v1/subtitles", get(mock_subtitles))
        .route("/api/v1/download", post(mock_download))
        .with_state(state)
}

fn authorized(headers: &HeaderMap) -> bool {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    header("api-key") == Some(TEST_API_KEY)
        && header("user-agent") == Some("SubtitleSearchApp v1.0.0")
        && header("accept") == Some("application/json")
}

fn subtitle(id: &str, name: &str, year: i64) -> Value {
    json!({
        "id": id,
        "type": "subtitle",
        "attributes": { "movie_name": name, "year": year, "language": "en" }
    })
}

async fn mock_subtitles(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "missing credentials" })),
        )
            .into_response();
    }

    if params.get("languages").map(String::as_str) == Some("fail") {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "unavailable" })),
        )
            .into_response();
    }

    if let Some(moviehash) = params.get("moviehash") {
        if params.get("moviehash_match").map(String::as_str) != Some("only") {
            return (StatusCode::BAD_REQUEST, "moviehash_match must be only").into_response();
        }
        return Json(json!({
            "total_count": 2,
            "data": [
                {
                    "id": "h1",
                    "attributes": { "movie_name": "Unrelated Title", "moviehash": moviehash }
                },
                { "id": "h2", "attributes": { "movie_name": "Another Release" } }
            ]
        }))
        .into_response();
    }

    match params.get("query").map(String::as_str) {
        Some("maintenance") => (
            [(CONTENT_TYPE, "application/json")],
            "<!DOCTYPE html><html><body>Down for maintenance</body></html>",
        )
            .into_response(),
        Some("ratelimited") => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "message": "Too many requests" })),
        )
            .into_response(),
        Some("garbage") => "this is not json".into_response(),
        _ => Json(json!({
            "total_count": 6,
            "data": [
                subtitle("a", "Inception", 2010),
                subtitle("b", "Inception 2", 2008),
                subtitle("c", "Inception", 2011),
                subtitle("d", "Inception", 2012),
                subtitle("e", "Inception", 2006),
                subtitle("f", "Interstellar", 2010),
            ]
        }))
        .into_response(),
    }
}

async fn mock_download(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "missing credentials" })),
        )
            .into_response();
    }

    if body["file_id"] == json!(404) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "file not found" })),
        )
            .into_response();
    }

    Json(json!({
        "link": "https://dl.opensubtitles.test/file.srt",
        "file_name": "file.srt",
        "file_id": body["file_id"],
        "remaining": 99
    }))
    .into_response()
}
