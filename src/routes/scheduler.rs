use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::db::job_queries;
use crate::errors::AppError;
use crate::models::job::{
    CreateAgentScheduleRequest, RescheduleRequest, UpdateAgentScheduleRequest,
    UpdateScheduleRequest,
};
use crate::services::job_scheduler::Trigger;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scheduler/jobs", get(list_jobs))
        .route("/scheduler/jobs/:id", get(get_job))
        .route("/scheduler/jobs/:id/pause", post(pause))
        .route("/scheduler/jobs/:id/resume", post(resume))
        .route("/scheduler/jobs/:id/trigger", post(trigger))
        .route("/scheduler/jobs/:id/schedule", put(update_schedule))
        .route("/scheduler/jobs/:id/reschedule", put(reschedule))
        .route("/scheduler/jobs/:id/history", get(job_history))
        .route("/scheduler/history", get(all_history))
        .route("/scheduler/agent-schedules", get(list_agent_schedules))
        .route("/scheduler/agent-schedules", post(create_agent_schedule))
        .route("/scheduler/agent-schedules/:id", put(update_agent_schedule))
        .route("/scheduler/agent-schedules/:id", delete(delete_agent_schedule))
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.jobs.get_all_jobs().await)
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .jobs
        .get_job(&id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound(format!("job {id}")))
}

async fn pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.jobs.pause(&id).await?;
    Ok(Json(json!({"paused": id})))
}

async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.jobs.resume(&id).await?;
    Ok(Json(json!({"resumed": id})))
}

async fn trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.jobs.trigger_now(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"triggered": id}))))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let trigger = Trigger::from_parts(&req.trigger, &req.trigger_args)?;
    state.jobs.update_schedule(&id, trigger).await?;
    Ok(Json(state.jobs.get_job(&id).await))
}

/// Interval shorthand: 0 pauses the job, anything else resumes it on the
/// new interval.
async fn reschedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.jobs.reschedule(&id, req.seconds).await?;
    Ok(Json(state.jobs.get_job(&id).await))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

async fn job_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(job_queries::get_job_history(&state.pool, Some(&id), limit).await?))
}

async fn all_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(job_queries::get_job_history(&state.pool, None, limit).await?))
}

async fn list_agent_schedules(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.jobs.list_agent_schedules().await?))
}

async fn create_agent_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentScheduleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = state.jobs.create_agent_schedule(req).await?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

async fn update_agent_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAgentScheduleRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.jobs.update_agent_schedule(id, req).await?))
}

async fn delete_agent_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !state.jobs.delete_agent_schedule(id).await? {
        return Err(AppError::NotFound(format!("agent schedule {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}
