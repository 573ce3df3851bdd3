//! HTTP API Server
//!
//! Local REST surface for the UI: queue inspection and writes, sync
//! control, cache maintenance and a live sync status stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::engine::SyncEngine;
use crate::error::{Error, Result};
use crate::model::{Draft, PaymentUpdate, RecordKind};
use crate::queue::QueueStatus;
use crate::records::WriteOutcome;
use crate::sync::{DrainReport, SyncTrigger};

/// Shared application state
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(config: ApiConfig, engine: Arc<SyncEngine>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { engine }),
        }
    }

    /// Create the router
    pub fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let router = Router::new()
            // Status
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/events", get(handle_events))
            // Queue
            .route("/queue", get(handle_list_queue).post(handle_enqueue))
            .route("/queue/:local_id", delete(handle_discard))
            .route("/queue/:local_id/requeue", post(handle_requeue))
            // Sync and cache
            .route("/sync", post(handle_sync))
            .route("/cache/refresh", post(handle_cache_refresh))
            .route("/cache/clear", post(handle_cache_clear))
            // Privileged edits
            .route("/payments/:id/edit", post(handle_edit_payment))
            .with_state(state);

        let router = router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
        if cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn start(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Queue listing filter
#[derive(Debug, Default, Deserialize)]
pub struct QueueFilter {
    pub status: Option<String>,
    pub kind: Option<String>,
}

/// Cache clear request
#[derive(Debug, Default, Deserialize)]
pub struct CacheClearRequest {
    /// Also drop essential reference data
    #[serde(default)]
    pub all: bool,
}

/// Payment edit request. Always applied as the session actor.
#[derive(Debug, Deserialize)]
pub struct EditPaymentRequest {
    pub update: PaymentUpdate,
    pub reason: String,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub device_id: String,
    pub online: bool,
}

/// Sync request response
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    /// False when a drain was already running or the device is offline
    pub started: bool,
    pub report: Option<DrainReport>,
}

#[derive(Debug, Serialize)]
pub struct RequeueResponse {
    pub local_id: String,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub removed: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error wrapper that renders as JSON with a matching status code
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION"),
            Error::QueueItemNotFound(_) | Error::RemoteNotFound { .. } => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            Error::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            Error::OfflineUnavailable(_) | Error::Network(_) | Error::ConnectionTimeout(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "OFFLINE")
            }
            Error::RemoteRejected { .. } | Error::RemoteSubmission(_) => {
                (StatusCode::BAD_GATEWAY, "REMOTE")
            }
            Error::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!("API request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.item_message(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message,
            code: "BAD_REQUEST".to_string(),
        }),
    )
        .into_response()
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        device_id: state.engine.device_id().to_string(),
        online: state.engine.connectivity().is_online(),
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.status().await?))
}

async fn handle_list_queue(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<QueueFilter>,
) -> ApiResult<Response> {
    let status = match filter.status.as_deref() {
        None => None,
        Some(raw) => match QueueStatus::parse(&raw.to_ascii_lowercase()) {
            Some(status) => Some(status),
            None => return Ok(bad_request(format!("unknown status '{}'", raw))),
        },
    };
    let kind = match filter.kind.as_deref() {
        None => None,
        Some(raw) => match RecordKind::parse(&raw.to_ascii_lowercase()) {
            Some(kind) => Some(kind),
            None => return Ok(bad_request(format!("unknown kind '{}'", raw))),
        },
    };

    let items = state.engine.queue().list(status, kind).await?;
    Ok(Json(items).into_response())
}

async fn handle_enqueue(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<Draft>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.engine.records().submit(draft).await?;
    let status = match outcome {
        WriteOutcome::Synced { .. } => StatusCode::CREATED,
        WriteOutcome::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

async fn handle_discard(
    State(state): State<Arc<AppState>>,
    Path(local_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.records().discard(&local_id).await?))
}

async fn handle_requeue(
    State(state): State<Arc<AppState>>,
    Path(local_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let local_id = state.engine.records().resubmit(&local_id).await?;
    Ok(Json(RequeueResponse { local_id }))
}

async fn handle_sync(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let report = state.engine.orchestrator().drain(SyncTrigger::Manual).await?;
    Ok(Json(SyncResponse {
        started: report.is_some(),
        report,
    }))
}

async fn handle_cache_refresh(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    state.engine.reference().refresh_all().await?;
    Ok(Json(state.engine.cache().stats().await?))
}

async fn handle_cache_clear(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CacheClearRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let cache = state.engine.cache();
    let removed = if request.all {
        cache.clear_all().await?
    } else {
        cache.clear_non_essential().await?
    };
    Ok(Json(CacheClearResponse { removed }))
}

async fn handle_edit_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<EditPaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let records = state.engine.records();
    let edited = records
        .edit_payment(&id, req.update, &req.reason, records.session())
        .await?;
    Ok(Json(edited))
}

/// Server-sent stream of sync status, one event per change
async fn handle_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let updates = WatchStream::new(state.engine.orchestrator().subscribe()).map(|status| {
        let event = Event::default().event("sync_status");
        Ok::<_, Infallible>(event.json_data(&status).unwrap_or_else(|e| {
            tracing::warn!("Failed to encode sync status: {}", e);
            Event::default().event("error")
        }))
    });

    Sse::new(updates).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
