#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use ccbagenda::admin::FallbackBackend;
use ccbagenda::{app, build_state, AppConfig};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

type Responder = Arc<dyn Fn(&Value) -> (u16, String) + Send + Sync>;

#[derive(Clone)]
struct ScriptState {
    calls: Arc<Mutex<Vec<Value>>>,
    respond: Responder,
    delay: Duration,
}

/// A stand-in Apps Script deployment on an ephemeral port.  Every JSON body
/// it receives is recorded in order.
pub struct MockScript {
    pub url: String,
    calls: Arc<Mutex<Vec<Value>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockScript {
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&Value) -> (u16, String) + Send + Sync + 'static,
    {
        Self::spawn_slow(Duration::ZERO, respond).await
    }

    /// Like `spawn`, but every reply is held back for `delay`.  Requests are
    /// recorded on arrival.
    pub async fn spawn_slow<F>(delay: Duration, respond: F) -> Self
    where
        F: Fn(&Value) -> (u16, String) + Send + Sync + 'static,
    {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = ScriptState {
            calls: calls.clone(),
            respond: Arc::new(respond),
            delay,
        };
        let router = Router::new()
            .route("/exec", post(script_handler))
            .with_state(state);
        let (addr, handle) = serve(router).await;
        Self {
            url: format!("http://{addr}/exec"),
            calls,
            handle,
        }
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    /// Keys received, in order.
    pub fn keys(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c["key"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl Drop for MockScript {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn script_handler(State(state): State<ScriptState>, body: Bytes) -> Response {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let (status, text) = (state.respond)(&payload);
    state.calls.lock().unwrap().push(payload);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        text,
    )
        .into_response()
}

/// A stand-in for the published CSV export.  Records requested URIs.
pub struct MockSheet {
    pub url: String,
    uris: Arc<Mutex<Vec<String>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockSheet {
    pub async fn spawn(status: u16, csv: &str) -> Self {
        let uris = Arc::new(Mutex::new(Vec::new()));
        let state = (uris.clone(), status, csv.to_string());
        let router = Router::new()
            .route("/csv", get(sheet_handler))
            .with_state(state);
        let (addr, handle) = serve(router).await;
        Self {
            url: format!("http://{addr}/csv?output=csv"),
            uris,
            handle,
        }
    }

    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }
}

impl Drop for MockSheet {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn sheet_handler(
    State((uris, status, csv)): State<(Arc<Mutex<Vec<String>>>, u16, String)>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    uris.lock().unwrap().push(uri.to_string());
    (StatusCode::from_u16(status).unwrap(), csv).into_response()
}

async fn serve(router: Router) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}

/// A URL on which nothing is listening.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/exec")
}

/// Configuration with every setting present and the fallback disabled.
pub fn config(script_url: &str) -> AppConfig {
    AppConfig {
        script_url: Some(script_url.to_string()),
        admin_key: Some("abc".to_string()),
        admin_password: Some("segredo".to_string()),
        sheet_csv_url: None,
        fallback: None,
        attempt_timeout_ms: 2_000,
        request_deadline_ms: 10_000,
        max_request_bytes: Some(64 * 1024),
        static_dir: PathBuf::from("static"),
    }
}

pub fn with_fallback(mut config: AppConfig, url: &str, keys: &[&str]) -> AppConfig {
    config.fallback = Some(FallbackBackend {
        url: url.to_string(),
        keys: keys.iter().map(|k| k.to_string()).collect(),
    });
    config
}

pub fn router(config: AppConfig) -> Router {
    app(build_state(config).unwrap())
}

/// Drive one request through the router; returns status, headers and body.
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

pub async fn send_json(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

pub fn post_admin(path: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

pub fn get_request(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}
