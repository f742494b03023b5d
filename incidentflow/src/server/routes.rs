//! Route handlers.
//!
//! - GET  /health
//! - POST /jobs, GET /jobs
//! - GET  /jobs/{id}, /jobs/{id}/results
//! - GET  /jobs/{id}/progress (SSE)
//! - GET  /jobs/{id}/artifacts/{*path}
//! - GET  /metrics/bus

use super::error::{AppError, AppResult};
use super::state::AppState;
use super::wire::{progress_frames, sse_event};
use crate::core::JobId;
use crate::jobs::{JobRecord, JobSummary, Submission};
use crate::service::JobResults;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid job id: {raw}")))
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// POST /jobs
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<Submission>,
) -> AppResult<Json<Value>> {
    let job_id = state.service.submit(submission)?;
    Ok(Json(json!({
        "job_id": job_id,
        "message": "Video uploaded successfully. Processing started.",
    })))
}

/// GET /jobs
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    Json(state.service.list())
}

/// GET /jobs/{id}
async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<JobRecord>> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.service.status(job_id)?))
}

/// GET /jobs/{id}/results
async fn job_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<JobResults>> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.service.results(job_id)?))
}

/// GET /jobs/{id}/progress
///
/// Replays the job's history, then follows it live. The stream ends after
/// `done`, or early if this client falls too far behind; reconnecting
/// replays from `connected` again.
async fn job_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job_id = parse_job_id(&id)?;
    let observer = state.service.attach(job_id)?;
    debug!(job_id = %job_id, observer_id = observer.id(), "Progress stream opened");

    let stream = progress_frames(job_id, observer, sse_event);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keepalive)))
}

/// GET /jobs/{id}/artifacts/{*path}
async fn job_artifact(
    State(state): State<Arc<AppState>>,
    Path((id, path)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&id)?;
    let artifact = state.service.fetch_artifact(job_id, &path).await?;
    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, artifact.media_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    ))
}

/// GET /metrics/bus
async fn bus_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.service.metrics().to_dict())
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{id}", get(job_status))
        .route("/jobs/{id}/results", get(job_results))
        .route("/jobs/{id}/progress", get(job_progress))
        .route("/jobs/{id}/artifacts/{*path}", get(job_artifact))
        .route("/metrics/bus", get(bus_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
