// tests/api_http.rs
//
// HTTP-level tests for the control API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /jobs
// - POST /jobs/{id}/run
// - DELETE /jobs/{id}
// - PUT /jobs/{id}
// - POST /digest/preview
// - GET /metrics

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use standup_digest::config::settings::{DigestSettings, DAILY_DIGEST_JOB_ID};
use standup_digest::error::CollectorError;
use standup_digest::metrics::Metrics;
use standup_digest::summarize::DisabledSummarizer;
use standup_digest::{
    api, digest_job, AggregationPipeline, AppState, Collector, DigestEngine, DigestScheduler,
    DispatchCoordinator, DispatchPlan, UpdateRecord,
};

const BODY_LIMIT: usize = 1024 * 1024;

struct OneUpdate;

#[async_trait]
impl Collector for OneUpdate {
    async fn fetch_updates(&self, _since: DateTime<Utc>) -> Result<Vec<UpdateRecord>, CollectorError> {
        Ok(vec![UpdateRecord::new("jira:P-1", "shipped auth", Utc::now())])
    }
    fn name(&self) -> &str {
        "fixture"
    }
}

fn test_state() -> AppState {
    let engine = DigestEngine::new(
        AggregationPipeline::new(Arc::new(DisabledSummarizer)).with_collector(Arc::new(OneUpdate)),
        DispatchCoordinator::new(),
        DispatchPlan::from_settings(&DigestSettings::default()),
        Tz::UTC,
    )
    .into_shared();
    let scheduler = DigestScheduler::new(Tz::UTC, Duration::from_secs(300));
    scheduler
        .try_schedule(DAILY_DIGEST_JOB_ID, "0 17 * * 1-5", digest_job(engine.clone(), None))
        .expect("schedule daily digest");
    AppState { scheduler, engine }
}

fn test_router(state: AppState) -> Router {
    api::router(state, None)
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, String) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (status, body) = send(test_router(test_state()), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "OK");
}

#[tokio::test]
async fn api_jobs_lists_daily_digest() {
    let (status, body) = send(test_router(test_state()), "GET", "/jobs", None).await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_str(&body).expect("json");
    let job = &v[DAILY_DIGEST_JOB_ID];
    assert_eq!(
        job["trigger"],
        "cron[minute='0', hour='17', day='*', month='*', day_of_week='1-5']"
    );
    assert_eq!(job["pending"], true);
    assert_eq!(job["running"], false);
    assert!(job["next_run_time"].is_string());
}

#[tokio::test]
async fn api_run_now_is_202_or_404() {
    let state = test_state();
    let (status, _) = send(test_router(state.clone()), "POST", "/jobs/daily_digest/run", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(test_router(state), "POST", "/jobs/missing/run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_delete_removes_job_once() {
    let state = test_state();
    let (status, _) = send(test_router(state.clone()), "DELETE", "/jobs/daily_digest", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.scheduler.list_jobs().is_empty());

    let (status, _) = send(test_router(state), "DELETE", "/jobs/daily_digest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_put_reschedules_or_rejects_bad_cron() {
    let state = test_state();

    let (status, body) = send(
        test_router(state.clone()),
        "PUT",
        "/jobs/daily_digest",
        Some(serde_json::json!({ "cron": "30 9 * * 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).expect("json");
    assert_eq!(
        v["trigger"],
        "cron[minute='30', hour='9', day='*', month='*', day_of_week='1']"
    );

    let (status, body) = send(
        test_router(state.clone()),
        "PUT",
        "/jobs/daily_digest",
        Some(serde_json::json!({ "cron": "every day at five" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid cron expression"));

    // The earlier trigger is still in effect.
    let jobs = state.scheduler.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[DAILY_DIGEST_JOB_ID].trigger.contains("hour='9'"));
}

#[tokio::test]
async fn api_preview_renders_without_dispatch() {
    let (status, body) = send(test_router(test_state()), "POST", "/digest/preview", None).await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_str(&body).expect("json");
    assert_eq!(v["records"], 1);
    let text = v["text"].as_str().expect("text");
    assert!(text.starts_with("# Project Update Digest"));
    assert!(text.contains("## Progress\n1. shipped auth\n*Source: jira:P-1*"));
    assert_eq!(v["summary"]["progress"][0]["source"], "jira:P-1");
}

#[tokio::test]
async fn api_metrics_route_when_handle_present() {
    let metrics = Metrics::detached();
    let app = api::router(test_state(), Some(&metrics));
    let (status, _) = send(app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(test_router(test_state()), "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_run_now_conflicts_while_job_is_running() {
    let state = test_state();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state.scheduler.schedule("slow", "0 0 1 1 *", move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::Ok(())
        }
    });
    state.scheduler.start().await;

    let (status, _) = send(test_router(state.clone()), "POST", "/jobs/slow/run", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("job should start");

    let (status, _) = send(test_router(state.clone()), "POST", "/jobs/slow/run", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    state.scheduler.stop().await;
}
