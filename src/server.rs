//! HTTP server for receiving wearable telemetry.
//!
//! This module provides an HTTP server that:
//! - Accepts one device sample per request via POST /v1/subjects/:id/samples
//! - Serves live readings, rollup history and health events
//! - Lets operators acknowledge events and trigger aggregation by hand
//!
//! # Architecture
//!
//! ```text
//! Wearable ──→ POST /samples ──→ validate ──→ rate limit ──→ buffer + holdover
//!                                                               ↓
//! Dashboard ←── GET /live, /history, /events ←── store ←── scheduler
//! ```
//!
//! Authentication is left to whatever sits in front of this server.

use crate::core::aggregation::{HealthEvent, IntervalType, RollupRecord};
use crate::error::{IngestError, StoreError};
use crate::ingest::{LiveReading, SensorPayload};
use crate::pipeline::Pipeline;
use crate::scheduler::{TickOutcome, TickReport};
use crate::store::{EventQuery, HistoryRange, DEFAULT_EVENTS_LIMIT};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Shared server state
pub struct ServerState {
    pipeline: Arc<Pipeline>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Response from the samples endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveResponse {
    pub success: bool,
    pub data: LiveReading,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub data: Vec<RollupRecord>,
    pub count: usize,
    pub range: HistoryRange,
    pub interval: IntervalType,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub success: bool,
    pub data: Vec<HealthEvent>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub data: HealthEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TickReport>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn api_error(status: StatusCode, code: &str, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::EventNotFound { .. } => api_error(StatusCode::NOT_FOUND, "EVENT_NOT_FOUND", e),
        other => {
            tracing::error!("Store error: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", other)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub range: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub limit: Option<usize>,
    pub acknowledged: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub subject_id: Option<String>,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /v1/subjects/:id/samples
///
/// Validation happens here, before the sample reaches the core.
async fn ingest_sample(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<String>,
    Json(payload): Json<SensorPayload>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let reading = payload
        .validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e))?;

    let sample = state
        .pipeline
        .ingest()
        .ingest(&subject_id, reading)
        .await
        .map_err(|e| match e {
            IngestError::RateLimited { .. } => {
                api_error(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", e)
            }
            IngestError::Backend(ref inner) => {
                tracing::error!(subject = %subject_id, "Sensor ingest failed: {}", inner);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "BACKEND_ERROR", e)
            }
        })?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            success: true,
            message: "Sensor data ingested successfully".to_string(),
            timestamp: sample.server_timestamp,
        }),
    ))
}

/// GET /v1/subjects/:id/live
async fn live(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<String>,
) -> Result<Json<LiveResponse>, ApiError> {
    let data = state
        .pipeline
        .ingest()
        .live(&subject_id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "BACKEND_ERROR", e))?;
    Ok(Json(LiveResponse {
        success: true,
        data,
    }))
}

/// GET /v1/subjects/:id/history?range=1h|24h|7d&interval=1min|5min|hour
async fn history(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let range = match params.range.as_deref() {
        None => HistoryRange::default(),
        Some(raw) => HistoryRange::parse(raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, "INVALID_RANGE", format!("Unknown range: {raw}"))
        })?,
    };
    let interval = match params.interval.as_deref() {
        None => IntervalType::Minute,
        Some(raw) => IntervalType::parse(raw).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "INVALID_INTERVAL",
                format!("Unknown interval: {raw}"),
            )
        })?,
    };

    let data = state
        .pipeline
        .history(&subject_id, range, interval)
        .await
        .map_err(store_error)?;
    Ok(Json(HistoryResponse {
        success: true,
        count: data.len(),
        data,
        range,
        interval,
    }))
}

/// GET /v1/subjects/:id/events?limit=&acknowledged=
async fn events(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Result<Json<EventsResponse>, ApiError> {
    let mut query = EventQuery::new(subject_id).limit(params.limit.unwrap_or(DEFAULT_EVENTS_LIMIT));
    if let Some(acknowledged) = params.acknowledged {
        query = query.acknowledged(acknowledged);
    }

    let data = state.pipeline.events(query).await.map_err(store_error)?;
    Ok(Json(EventsResponse {
        success: true,
        count: data.len(),
        data,
    }))
}

/// POST /v1/subjects/:id/events/:event_id/ack
async fn acknowledge(
    State(state): State<Arc<ServerState>>,
    Path((subject_id, event_id)): Path<(String, Uuid)>,
) -> Result<Json<AckResponse>, ApiError> {
    let data = state
        .pipeline
        .acknowledge(&subject_id, event_id)
        .await
        .map_err(store_error)?;
    Ok(Json(AckResponse {
        success: true,
        data,
    }))
}

/// POST /v1/aggregation/trigger
///
/// With a `subject_id`, aggregates that subject immediately; otherwise runs a
/// regular tick, which is skipped if one is already running.
async fn trigger(
    State(state): State<Arc<ServerState>>,
    body: Option<Json<TriggerRequest>>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let outcome = state
        .pipeline
        .scheduler()
        .trigger(request.subject_id.as_deref())
        .await;

    match outcome {
        TickOutcome::Completed(report) => Ok(Json(TriggerResponse {
            success: true,
            message: "Aggregation triggered successfully".to_string(),
            report: Some(report),
        })),
        TickOutcome::Skipped => Ok(Json(TriggerResponse {
            success: true,
            message: "Aggregation already running, skipped".to_string(),
            report: None,
        })),
        TickOutcome::Failed(e) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "AGGREGATION_FAILED",
            e,
        )),
    }
}

/// Build the router over a pipeline.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let state = Arc::new(ServerState { pipeline });

    Router::new()
        .route("/health", get(health))
        .route("/v1/subjects/:id/samples", post(ingest_sample))
        .route("/v1/subjects/:id/live", get(live))
        .route("/v1/subjects/:id/history", get(history))
        .route("/v1/subjects/:id/events", get(events))
        .route("/v1/subjects/:id/events/:event_id/ack", post(acknowledge))
        .route("/v1/aggregation/trigger", post(trigger))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(pipeline);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Vitals server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
