//! Control API: health, job table inspection and manual control, digest preview.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::engine::{digest_job, DigestArtifact, DigestEngine};
use crate::metrics::Metrics;
use crate::scheduler::{DigestScheduler, JobInfo};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: DigestScheduler,
    pub engine: Arc<DigestEngine>,
}

pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", axum::routing::put(reschedule).delete(unschedule))
        .route("/jobs/{id}/run", post(run_now))
        .route("/digest/preview", post(preview))
        .with_state(state);

    if let Some(m) = metrics {
        app = app.merge(m.router());
    }
    app.layer(TraceLayer::new_for_http())
}

async fn list_jobs(State(state): State<AppState>) -> Json<BTreeMap<String, JobInfo>> {
    Json(state.scheduler.list_jobs())
}

/// 202 when queued, 404 for an unknown id, 409 while a run of the job is in flight.
async fn run_now(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if !state.scheduler.contains(&id) {
        return StatusCode::NOT_FOUND;
    }
    if state.scheduler.is_job_running(&id) {
        return StatusCode::CONFLICT;
    }
    if state.scheduler.trigger_now(&id) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn unschedule(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.scheduler.unschedule(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
struct RescheduleReq {
    cron: String,
    #[serde(default)]
    sinks: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn reschedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RescheduleReq>,
) -> Response {
    let job = digest_job(state.engine.clone(), req.sinks);
    match state.scheduler.try_schedule(&id, &req.cron, job) {
        Ok(()) => {
            let info = state.scheduler.list_jobs().remove(&id);
            (StatusCode::OK, Json(info)).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(ErrorBody { error: e.to_string() })).into_response(),
    }
}

async fn preview(State(state): State<AppState>) -> Json<DigestArtifact> {
    Json(state.engine.generate_digest().await)
}
