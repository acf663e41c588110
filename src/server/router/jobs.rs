use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use handoff_agent_core::{
    ActionOracle, InputRequest, JobEvent, JobId, JobOptions, JobPhase, JobStatus,
    StartUrlOracle, TokenUsage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, instrument};
use url::Url;

use crate::errors::AppError;
use crate::server::ServeState;

pub(super) fn router() -> Router<ServeState> {
    Router::new()
        .route("/api/jobs", post(create_job_handler))
        .route("/api/jobs/:job_id/status", get(job_status_handler))
        .route("/api/jobs/:job_id/input-request", get(input_request_handler))
        .route(
            "/api/jobs/:job_id/input-response",
            post(input_response_handler),
        )
        .route("/api/jobs/:job_id/cancel", post(cancel_job_handler))
        .route("/api/jobs/:job_id/result", get(job_result_handler))
        .route("/api/jobs/:job_id/events", get(job_events_sse_handler))
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    goal: String,
    #[serde(default)]
    start_url: Option<String>,
    /// Result budget; the job completes once this many items were extracted.
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct CreateJobResponse {
    success: bool,
    job_id: JobId,
}

#[instrument(name = "handoff.jobs.create", skip(state, body))]
async fn create_job_handler(
    State(state): State<ServeState>,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    if !state.health_snapshot().ready {
        return Err(AppError::Unavailable("job engine is not ready".to_string()));
    }
    let goal = body.goal.trim();
    if goal.is_empty() {
        return Err(AppError::bad_request("goal must not be empty"));
    }
    let oracle: Arc<dyn ActionOracle> = match body.start_url.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let url = Url::parse(raw)
                .map_err(|err| AppError::bad_request(format!("invalid start_url: {err}")))?;
            Arc::new(StartUrlOracle::new(url.to_string(), state.oracle.clone()))
        }
        _ => state.oracle.clone(),
    };
    let mut options = JobOptions::default();
    match body.top_k {
        Some(0) => return Err(AppError::bad_request("top_k must be at least 1")),
        Some(budget) => options = options.with_result_budget(budget),
        None => {}
    }
    let job_id = state
        .manager
        .spawn_with_options(goal, options, oracle, state.driver.clone());
    info!(job_id = %job_id, "job accepted");
    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            success: true,
            job_id,
        }),
    ))
}

#[derive(Serialize)]
struct JobStatusResponse {
    success: bool,
    #[serde(flatten)]
    status: JobStatus,
}

#[instrument(name = "handoff.jobs.status", skip(state), fields(job_id = %job_id))]
async fn job_status_handler(
    State(state): State<ServeState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let status = state.manager.get_status(&JobId::from(job_id))?;
    Ok(Json(JobStatusResponse {
        success: true,
        status,
    }))
}

#[derive(Serialize)]
struct InputRequestResponse {
    success: bool,
    pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<InputRequest>,
}

#[instrument(name = "handoff.jobs.input_request", skip(state), fields(job_id = %job_id))]
async fn input_request_handler(
    State(state): State<ServeState>,
    Path(job_id): Path<String>,
) -> Result<Json<InputRequestResponse>, AppError> {
    let request = state.manager.get_pending_request(&JobId::from(job_id))?;
    Ok(Json(InputRequestResponse {
        success: true,
        pending: request.is_some(),
        request,
    }))
}

#[derive(Deserialize)]
struct InputResponseBody {
    #[serde(alias = "value")]
    input_value: String,
}

#[derive(Serialize)]
struct AckResponse {
    success: bool,
}

#[instrument(name = "handoff.jobs.input_response", skip(state, body), fields(job_id = %job_id))]
async fn input_response_handler(
    State(state): State<ServeState>,
    Path(job_id): Path<String>,
    Json(body): Json<InputResponseBody>,
) -> Result<Json<AckResponse>, AppError> {
    state
        .manager
        .submit_response(&JobId::from(job_id), body.input_value)?;
    Ok(Json(AckResponse { success: true }))
}

#[instrument(name = "handoff.jobs.cancel", skip(state), fields(job_id = %job_id))]
async fn cancel_job_handler(
    State(state): State<ServeState>,
    Path(job_id): Path<String>,
) -> Result<Json<AckResponse>, AppError> {
    state.manager.cancel(&JobId::from(job_id))?;
    Ok(Json(AckResponse { success: true }))
}

#[derive(Serialize)]
struct JobResultResponse {
    success: bool,
    job_id: JobId,
    phase: JobPhase,
    finished: bool,
    step: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    results: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
    usage: UsageSummary,
    history: Vec<Value>,
}

#[derive(Serialize)]
struct UsageSummary {
    #[serde(flatten)]
    total: TokenUsage,
    steps: usize,
}

#[instrument(name = "handoff.jobs.result", skip(state), fields(job_id = %job_id))]
async fn job_result_handler(
    State(state): State<ServeState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResultResponse>, AppError> {
    let snapshot = state.manager.snapshot(&JobId::from(job_id))?;
    let redactor = &state.manager.services().redactor;
    Ok(Json(JobResultResponse {
        success: true,
        history: snapshot.public_history(redactor),
        results: snapshot.public_results(redactor),
        top_k: snapshot.result_budget,
        usage: UsageSummary {
            total: snapshot.total_usage(),
            steps: snapshot.token_usage.len(),
        },
        finished: snapshot.is_terminal(),
        job_id: snapshot.job_id,
        phase: snapshot.phase,
        step: snapshot.step,
        summary: snapshot.summary.map(|summary| redactor.text(&summary)),
        reason: snapshot.reason.map(|reason| redactor.text(&reason)),
    }))
}

#[instrument(name = "handoff.jobs.stream", skip(state), fields(job_id = %job_id))]
async fn job_events_sse_handler(
    State(state): State<ServeState>,
    Path(job_id): Path<String>,
) -> Response {
    let job_id = JobId::from(job_id);
    // Subscribe before reading the backlog so nothing falls in between.
    let mut receiver = state.manager.subscribe();
    let history = match state.manager.events(&job_id) {
        Ok(history) => history,
        Err(err) => return AppError::from(err).into_response(),
    };
    let finished = history.iter().any(|event| event.kind.is_terminal());

    let stream = stream! {
        let mut sequence = 0u64;
        for event in &history {
            sequence += 1;
            yield Ok::<Event, Infallible>(sse_event(sequence, event));
        }
        if !finished {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.job_id != job_id || history.contains(&event) {
                            continue;
                        }
                        sequence += 1;
                        let terminal = event.kind.is_terminal();
                        yield Ok(sse_event(sequence, &event));
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

fn sse_event(sequence: u64, event: &JobEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(sequence.to_string())
        .event(event.kind.as_str())
        .data(data)
}
