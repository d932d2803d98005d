//! HTTP Surface
//!
//! Thin axum layer over [`StreamRegistry`]. Handlers translate requests into
//! registry calls and registry errors into status codes; no pipeline logic
//! lives here.
//!
//! ```text
//!   GET  /                    service summary
//!   GET  /languages           supported target languages
//!   POST /start/{language}    create a session
//!   GET  /status/{id}         session snapshot
//!   GET  /stream/{id}         multipart delivery of translated chunks
//!   POST /stop/{id}           stop and evict
//!   GET  /streams             all sessions
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use dubcast_core::delivery::CONTENT_TYPE as MULTIPART_CONTENT_TYPE;
use dubcast_core::languages::{self, TARGET_LANGUAGES};
use dubcast_core::{
    DeliveryConfig, DeliveryLoop, RegistryError, SessionId, SessionStatus, StartRequest,
    StatusSnapshot, StreamRegistry,
};

const STREAM_ID_HEADER: HeaderName = HeaderName::from_static("x-stream-id");

/// Shared handler state
#[derive(Clone, Debug)]
pub struct AppState {
    registry: Arc<StreamRegistry>,
    delivery: DeliveryConfig,
}

impl AppState {
    /// Wrap a registry and the delivery timing used for `/stream`
    pub fn new(registry: Arc<StreamRegistry>, delivery: DeliveryConfig) -> Self {
        Self { registry, delivery }
    }
}

/// Handler failures
#[derive(Debug, Error)]
pub enum ApiError {
    /// Registry rejected the request
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Registry(RegistryError::UnknownSessionId { .. }) => StatusCode::NOT_FOUND,
            Self::Registry(
                RegistryError::UnsupportedLanguage { .. } | RegistryError::InvalidOptions(_),
            ) => StatusCode::BAD_REQUEST,
            Self::Registry(RegistryError::CapacityReached { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request refused");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/languages", get(list_languages))
        .route("/start/{language}", post(start_stream))
        .route("/status/{id}", get(stream_status))
        .route("/stream/{id}", get(stream_audio))
        .route("/stop/{id}", post(stop_stream))
        .route("/streams", get(list_streams))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    supported_languages: Vec<&'static str>,
    active_streams: usize,
}

async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "dubcast",
        version: env!("CARGO_PKG_VERSION"),
        supported_languages: languages::keys(),
        active_streams: state.registry.active_count(),
    })
}

async fn list_languages() -> Json<serde_json::Value> {
    let table: BTreeMap<&str, &str> = TARGET_LANGUAGES.iter().map(|l| (l.key, l.label)).collect();
    let total_count = table.len();
    Json(json!({
        "supported_languages": table,
        "total_count": total_count,
    }))
}

#[derive(Debug, Serialize)]
struct StartResponse {
    stream_id: SessionId,
    status: SessionStatus,
    language: String,
    target_language: String,
    stream_url: String,
    status_url: String,
}

async fn start_stream(
    State(state): State<AppState>,
    Path(language): Path<String>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let processor = state.registry.create(&language, request)?;
    let snapshot = processor.status();
    Ok(Json(StartResponse {
        stream_url: format!("/stream/{}", snapshot.stream_id),
        status_url: format!("/status/{}", snapshot.stream_id),
        stream_id: snapshot.stream_id,
        status: snapshot.status,
        language: snapshot.language,
        target_language: snapshot.target_language,
    }))
}

async fn stream_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    Ok(Json(state.registry.status(&SessionId::from(id.as_str()))?))
}

async fn stream_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = SessionId::from(id.as_str());
    let processor = state
        .registry
        .get(&id)
        .ok_or_else(|| RegistryError::UnknownSessionId { id: id.to_string() })?;

    tracing::info!(session_id = %id, "Delivery started");
    let body = DeliveryLoop::new(processor.session().clone(), state.delivery.clone()).into_body_stream();

    let mut response = (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(MULTIPART_CONTENT_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(body),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(STREAM_ID_HEADER, value);
    }
    Ok(response)
}

async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.registry.remove(&SessionId::from(id.as_str()))?;
    Ok(Json(json!({
        "stream_id": snapshot.stream_id,
        "status": snapshot.status,
        "message": "Stream stopped successfully",
    })))
}

async fn list_streams(State(state): State<AppState>) -> Json<serde_json::Value> {
    let streams = state.registry.list();
    let total_count = streams.len();
    Json(json!({
        "active_streams": streams,
        "total_count": total_count,
    }))
}
