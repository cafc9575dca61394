// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the webhook dispatcher service.
//!
//! - `POST /webhooks/:source`: inbound webhooks
//! - `GET /sync/pending`, `DELETE /sync/pending/:key`: sync-intent queue for
//!   the external task-sync agent
//! - `GET /health`, `GET /healthz`, `GET /metrics`

use crate::config::Config;
use crate::crypto::Crypto;
use crate::dispatcher::{DispatchResponse, Dispatcher};
use crate::error::{DispatchError, ErrorResponse};
use crate::event::Source;
use crate::metrics::{MetricsSink, PrometheusMetrics};
use crate::store::StoreError;
use crate::sync_queue::{PendingPage, DEFAULT_PAGE_SIZE};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use std::any::Any;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Shared application state.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub crypto: Arc<dyn Crypto>,
    /// Present when metrics are enabled
    pub metrics: Option<Arc<PrometheusMetrics>>,
    pub config: Config,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Query of `GET /sync/pending`.
#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Failures of the sync-queue endpoints.
#[derive(Debug, Error)]
pub enum QueueApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("no pending record under key {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for QueueApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            QueueApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            QueueApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            QueueApiError::Store(e) => {
                error!(error = %e, "Sync queue store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Build the service router with tracing and panic recovery.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/webhooks/:source", post(receive_webhook))
        .route("/sync/pending", get(list_pending))
        .route("/sync/pending/:key", delete(acknowledge_pending));

    if state.metrics.is_some() {
        router = router.route(&state.config.metrics.path, get(metrics));
    }

    let panics = PanicResponder::new(Arc::clone(state.dispatcher.metrics()));
    router
        .layer(CatchPanicLayer::custom(panics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turns a handler panic into an opaque 500 and counts it.
#[derive(Clone)]
pub struct PanicResponder {
    metrics: Arc<dyn MetricsSink>,
}

impl PanicResponder {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = axum::body::Body;

    fn response_for_panic(
        &mut self,
        panic: Box<dyn Any + Send + 'static>,
    ) -> axum::http::Response<Self::ResponseBody> {
        let message = panic
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        error!(panic = message, "Handler panicked");
        self.metrics.record_panic();
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "internal server error".to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "webhook-dispatcher",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Inbound webhook entry point.
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DispatchResponse>, DispatchError> {
    let source: Source = source
        .parse()
        .map_err(|_| DispatchError::UnknownSource(source.clone()))?;
    debug!(%source, bytes = body.len(), "Received webhook");

    state
        .dispatcher
        .dispatch(source, &headers, &body)
        .await
        .map(Json)
}

/// Page through pending sync intents.
pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PendingQuery>,
) -> Result<Json<PendingPage>, QueueApiError> {
    authorize(&state, &headers)?;
    let page = state
        .dispatcher
        .queue()
        .list(
            query.cursor.as_deref(),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page))
}

/// Remove a pending sync intent once the agent has applied it.
pub async fn acknowledge_pending(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<StatusCode, QueueApiError> {
    authorize(&state, &headers)?;
    if state.dispatcher.queue().acknowledge(&key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(QueueApiError::NotFound(key))
    }
}

/// Enforce the bearer token when one is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), QueueApiError> {
    let Some(expected) = state.config.sync.api_token.as_deref().filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if state
        .crypto
        .constant_time_eq(provided.as_bytes(), expected.as_bytes())
    {
        Ok(())
    } else {
        warn!("Rejected sync queue request with bad token");
        Err(QueueApiError::Unauthorized)
    }
}
