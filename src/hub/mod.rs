//! Wire-facing contract layer of the hub.
//!
//! Thin translation between HTTP and the store: bearer-token auth on
//! mutating calls, JSON (de)serialization of opaque payloads, outcome to
//! status-code mapping, and lifecycle event publication after each
//! successful transition. No correctness logic lives here; the store's
//! transactions carry all of it.

pub mod reaper;

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::HubConfig;
use crate::error::{FleetError, Result};
use crate::events::{EventBroadcaster, JobEventKind};
use crate::hub::reaper::Reaper;
use crate::store::{
    Db, FailOutcome, HeartbeatOutcome, JobStatus, JobStore, NewJob, Registration, StorePolicy,
    SubmitOutcome, WorkerRegistry,
};

#[derive(Clone)]
pub struct HubState {
    pub jobs: JobStore,
    pub workers: WorkerRegistry,
    pub events: EventBroadcaster,
    pub auth_token: Option<String>,
}

/// Build the full API router over the given state.
pub fn router(state: HubState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/claim", post(claim_job))
        .route("/jobs/counts-by-worker", get(counts_by_worker))
        .route("/jobs/events", get(job_events))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/jobs/:id/heartbeat", post(heartbeat_job))
        .route("/jobs/:id/result", post(submit_result))
        .route("/jobs/:id/fail", post(fail_job))
        .route("/workers", get(list_workers))
        .route("/workers/register", post(register_worker))
        .layer(cors)
        .with_state(state)
}

/// Run the hub: open the store, start the reaper, serve the API until the
/// shutdown token fires.
pub async fn run_hub(config: HubConfig, shutdown: CancellationToken) -> Result<()> {
    let db = Db::open(&config.db_path)?;
    let jobs = JobStore::new(
        db.clone(),
        StorePolicy {
            liveness_timeout_ms: config.liveness_timeout_ms,
        },
    );
    let workers = WorkerRegistry::new(db);
    let state = HubState {
        jobs: jobs.clone(),
        workers,
        events: EventBroadcaster::default(),
        auth_token: config.auth_token.clone(),
    };

    let reaper = Reaper::new(jobs, Duration::from_millis(config.reap_interval_ms));
    let reaper_shutdown = shutdown.clone();
    tokio::spawn(async move {
        reaper.run(reaper_shutdown).await;
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "Hub API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Auth + error helpers
// ---------------------------------------------------------------------------

fn authorized(state: &HubState, headers: &HeaderMap) -> bool {
    let Some(token) = &state.auth_token else {
        // No token configured: development mode, auth disabled
        return true;
    };
    let expected = format!("Bearer {token}");
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized"})),
    )
        .into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn internal_error(e: FleetError) -> Response {
    tracing::error!(error = %e, "Store operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /jobs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateJobRequest {
    #[serde(rename = "type")]
    job_type: Option<String>,
    params: Option<serde_json::Value>,
    priority: Option<i64>,
    max_attempts: Option<i64>,
    max_runtime_ms: Option<i64>,
    solver_url: Option<String>,
    solver_checksum: Option<String>,
}

async fn create_job(
    State(state): State<HubState>,
    headers: HeaderMap,
    Json(body): Json<CreateJobRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Some(job_type) = body.job_type.filter(|t| !t.is_empty()) else {
        return bad_request("type is required");
    };

    let mut new = NewJob::new(job_type);
    if let Some(params) = body.params {
        new = new.params(params.to_string());
    }
    if let Some(priority) = body.priority {
        new = new.priority(priority);
    }
    if let Some(max_attempts) = body.max_attempts {
        new = new.max_attempts(max_attempts);
    }
    if let Some(max_runtime_ms) = body.max_runtime_ms {
        new = new.max_runtime_ms(max_runtime_ms);
    }
    if let Some(url) = body.solver_url {
        new = new.solver(url, body.solver_checksum);
    }

    match state.jobs.create(new) {
        Ok(job) => {
            let response = json!({"id": job.id, "status": job.status});
            state.events.publish(JobEventKind::Created, job);
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /jobs — no auth, dashboard read path
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_jobs(State(state): State<HubState>, Query(query): Query<ListQuery>) -> Response {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => match JobStatus::parse(s) {
            Some(status) => Some(status),
            None => return bad_request("unknown status"),
        },
    };
    match state
        .jobs
        .list(status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
    {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /jobs/events — SSE stream of lifecycle transitions
// ---------------------------------------------------------------------------

async fn job_events(
    State(state): State<HubState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        // Lagged receivers drop events; subscribers recover by re-fetching
        let event = item.ok()?;
        let data = serde_json::to_string(&event.job).ok()?;
        Some(Ok(Event::default().event(event.kind.as_str()).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ---------------------------------------------------------------------------
// GET /jobs/counts-by-worker
// ---------------------------------------------------------------------------

async fn counts_by_worker(State(state): State<HubState>) -> Response {
    match state.jobs.counts_by_worker() {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /jobs/claim
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ClaimRequest {
    worker_id: Option<String>,
    types: Option<Vec<String>>,
}

async fn claim_job(
    State(state): State<HubState>,
    headers: HeaderMap,
    Json(body): Json<ClaimRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Some(worker_id) = body.worker_id.filter(|w| !w.is_empty()) else {
        return bad_request("worker_id required");
    };

    match state.jobs.claim(&worker_id, &body.types.unwrap_or_default()) {
        Ok(Some(job)) => {
            state.events.publish(JobEventKind::Assigned, job.clone());
            Json(job).into_response()
        }
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /jobs/:id, DELETE /jobs/:id
// ---------------------------------------------------------------------------

async fn get_job(State(state): State<HubState>, Path(id): Path<String>) -> Response {
    match state.jobs.get(&id) {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error(e),
    }
}

async fn cancel_job(
    State(state): State<HubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.jobs.cancel(&id) {
        Ok(true) => {
            if let Ok(Some(job)) = state.jobs.get(&id) {
                state.events.publish(JobEventKind::Failed, job);
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not found or not cancellable"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /jobs/:id/heartbeat
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct HeartbeatRequest {
    worker_id: Option<String>,
}

async fn heartbeat_job(
    State(state): State<HubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Some(worker_id) = body.worker_id else {
        return bad_request("worker_id required");
    };
    match state.jobs.heartbeat(&id, &worker_id) {
        Ok(HeartbeatOutcome::Ok) => StatusCode::NO_CONTENT.into_response(),
        Ok(HeartbeatOutcome::NotFound) => not_found(),
        Ok(HeartbeatOutcome::Conflict) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "job not assigned to this worker"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /jobs/:id/result
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SubmitResultRequest {
    worker_id: Option<String>,
    result: Option<serde_json::Value>,
    result_hash: Option<String>,
}

async fn submit_result(
    State(state): State<HubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SubmitResultRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Some(worker_id) = body.worker_id else {
        return bad_request("worker_id required");
    };
    let Some(result) = body.result else {
        return bad_request("result required");
    };
    let result_str = match result {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    let idempotency_key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok());

    match state.jobs.submit_result(
        &id,
        &worker_id,
        &result_str,
        body.result_hash.as_deref(),
        idempotency_key,
    ) {
        Ok(SubmitOutcome::Ok { duplicate }) => {
            if !duplicate {
                if let Ok(Some(job)) = state.jobs.get(&id) {
                    state.events.publish(JobEventKind::Completed, job);
                }
            }
            Json(json!({"ok": true, "duplicate": duplicate})).into_response()
        }
        Ok(SubmitOutcome::NotFound) => not_found(),
        Ok(SubmitOutcome::Conflict) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "job not assigned to this worker or already completed"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /jobs/:id/fail
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FailRequest {
    worker_id: Option<String>,
    reason: Option<String>,
}

async fn fail_job(
    State(state): State<HubState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<FailRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Some(worker_id) = body.worker_id else {
        return bad_request("worker_id required");
    };
    let reason = body.reason.unwrap_or_else(|| "unspecified".to_string());

    match state.jobs.fail(&id, &worker_id, &reason) {
        Ok(FailOutcome::Ok { new_status }) => {
            if let Ok(Some(job)) = state.jobs.get(&id) {
                let kind = if new_status == JobStatus::Quarantined {
                    JobEventKind::Quarantined
                } else {
                    JobEventKind::Failed
                };
                state.events.publish(kind, job);
            }
            Json(json!({"ok": true, "newStatus": new_status})).into_response()
        }
        Ok(FailOutcome::NotFound) => not_found(),
        Ok(FailOutcome::Conflict) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "job not assigned to this worker"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /workers/register
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RegisterRequest {
    worker_id: Option<String>,
    name: Option<String>,
    cores: Option<i64>,
    ram_gb: Option<f64>,
    tags: Option<Vec<String>>,
}

async fn register_worker(
    State(state): State<HubState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Some(worker_id) = body.worker_id.filter(|w| !w.is_empty()) else {
        return bad_request("worker_id required");
    };
    let registration = Registration {
        worker_id,
        name: body.name,
        cores: body.cores.unwrap_or(1),
        ram_gb: body.ram_gb.unwrap_or(1.0),
        tags: body.tags.unwrap_or_default(),
    };
    match state.workers.register(&registration) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /workers — no auth, dashboard read path
// ---------------------------------------------------------------------------

async fn list_workers(State(state): State<HubState>) -> Response {
    match state.workers.list() {
        Ok(records) => Json(records).into_response(),
        Err(e) => internal_error(e),
    }
}
