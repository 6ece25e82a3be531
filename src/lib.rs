//! Backend for the CCB agenda.  This module wires the admin write proxy,
//! the sheet-backed event feed and the static entry page into one axum
//! router.

mod config;
pub mod admin;
pub mod assets;
pub mod events;
pub mod keys;
pub mod upstream;
pub mod util;

pub use config::AppConfig;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody},
    DefaultBodyLimit, State,
};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;

use crate::admin::{outcome, AdminProxy};
use crate::events::EventSource;
use crate::upstream::HttpTransport;

pub use crate::util::Deadline;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub admin: Arc<AdminProxy>,
    pub events: Arc<EventSource>,
    pub static_dir: PathBuf,
    pub max_request_bytes: Option<usize>,
}

/// Build state from an already parsed configuration.  One reqwest client
/// is shared by the write proxy and the event feed.
pub fn build_state(config: AppConfig) -> Result<AppState, Box<dyn std::error::Error>> {
    let attempt_timeout = Duration::from_millis(config.attempt_timeout_ms);
    let client = reqwest::Client::builder()
        .connect_timeout(attempt_timeout)
        .build()?;

    let admin = AdminProxy::new(
        config.admin_settings(),
        Arc::new(HttpTransport::new(client.clone())),
    );
    if !admin.is_configured() {
        tracing::warn!("admin writes disabled until APPS_SCRIPT_URL, ADMIN_KEY and ADMIN_PASSWORD are set");
    }
    if config.fallback.is_none() {
        tracing::info!("fallback backend disabled");
    }
    let events = EventSource::new(config.sheet_csv_url.clone(), client, attempt_timeout);

    Ok(AppState {
        admin: Arc::new(admin),
        events: Arc::new(events),
        static_dir: config.static_dir,
        max_request_bytes: config.max_request_bytes,
    })
}

/// Build state from environment variables.  See `AppConfig::from_env` for
/// the variables read.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    build_state(config)
}

/// Build the axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let body_limit = match state.max_request_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/", get(index_handler).fallback(method_not_allowed))
        .route("/index.html", get(index_handler).fallback(method_not_allowed))
        .route("/api/admin", post(admin_handler).fallback(method_not_allowed))
        .route("/api/v1/admin", post(admin_handler).fallback(method_not_allowed))
        .route("/api/events", get(events_handler).fallback(method_not_allowed))
        .route("/healthz", get(healthz_handler))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "ok": false, "error": message.into() }))).into_response()
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Metodo nao permitido.")
}

/// Decode the inbound write body.  Empty means `{}`; valid JSON that is not
/// an object is treated as an empty payload.
fn decode_write_body(bytes: &[u8]) -> Result<Map<String, Value>, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

async fn admin_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            tracing::warn!(
                limit = state.max_request_bytes,
                "request body exceeded configured limit"
            );
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Requisicao muito grande.");
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "admin body could not be read");
            return error_response(rejection.status(), rejection.body_text());
        }
    };

    let payload = match decode_write_body(&bytes) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::debug!(error = %err, "malformed admin body");
            return error_response(StatusCode::BAD_REQUEST, "JSON invalido.");
        }
    };

    match state.admin.handle_write(payload).await {
        Ok(report) => {
            let (status, body) = outcome::render(&report);
            (status, Json(body)).into_response()
        }
        Err(err) => error_response(err.status(), err.to_string()),
    }
}

async fn events_handler(State(state): State<AppState>) -> Response {
    match state.events.fetch().await {
        Ok(events) => {
            (StatusCode::OK, Json(json!({ "ok": true, "data": events, "events": events })))
                .into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "event feed unavailable");
            error_response(err.status(), err.to_string())
        }
    }
}

async fn index_handler(State(state): State<AppState>) -> Response {
    match assets::read_index(&state.static_dir).await {
        Ok(html) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store, max-age=0"),
            ],
            html,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(dir = %state.static_dir.display(), error = %err, "index.html unavailable");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "index.html nao encontrado.")
        }
    }
}

/// Health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> Response {
    let json = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "adminConfigured": state.admin.is_configured(),
        "fallbackEnabled": state.admin.settings().fallback.is_some(),
    });
    (StatusCode::OK, Json(json)).into_response()
}
