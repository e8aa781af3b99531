use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::db::metrics_queries;
use crate::db::pool::pool_stats;
use crate::errors::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/app-state/:key", get(get_state))
        .route("/app-state/:key", put(put_state))
        .route("/metrics/system", get(system_metrics))
        .route("/metrics/endpoints", get(endpoint_metrics))
        .route("/activity", get(activity_feed))
        .route("/settings", get(all_settings))
        .route("/settings/:key", put(put_setting))
}

// ==============================================================================
// UI state persistence
// ==============================================================================

async fn get_state(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let value = metrics_queries::get_ui_state(&state.pool, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("app state {key:?}")))?;
    let parsed: serde_json::Value =
        serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
    Ok(Json(json!({"key": key, "value": parsed})))
}

async fn put_state(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AppError> {
    let serialised = value.to_string();
    if serialised.len() > 65_536 {
        return Err(AppError::PayloadTooLarge);
    }
    metrics_queries::put_ui_state(&state.pool, &key, &serialised).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// Metrics
// ==============================================================================

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<i64>,
}

async fn system_metrics(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let snapshots = metrics_queries::recent_perf_snapshots(&state.pool, limit).await?;
    let stats = pool_stats(&state.pool);
    Ok(Json(json!({
        "pool": {"size": stats.size, "in_use": stats.in_use, "available": stats.available},
        "snapshots": snapshots
            .into_iter()
            .map(|(cpu, mem, in_use, idle, at)| json!({
                "cpu_pct": cpu,
                "mem_pct": mem,
                "db_pool_in_use": in_use,
                "db_pool_idle": idle,
                "recorded_at": at,
            }))
            .collect::<Vec<_>>(),
    })))
}

async fn endpoint_metrics(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 500);
    let rows = metrics_queries::endpoint_stats(&state.pool, limit).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(endpoint, method, status_class, calls, p95, avg, date)| {
                json!({
                    "endpoint": endpoint,
                    "method": method,
                    "status_class": status_class,
                    "call_count": calls,
                    "p95_ms": p95,
                    "avg_ms": avg,
                    "log_date": date,
                })
            })
            .collect::<Vec<_>>(),
    ))
}

// ==============================================================================
// Activity feed
// ==============================================================================

/// Unified timeline of agent runs, job executions, and logged errors,
/// newest first.
async fn activity_feed(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);

    let mut entries: Vec<(String, serde_json::Value)> = Vec::new();

    for run in crate::db::agent_queries::list_runs(&state.pool, None, 1, limit).await? {
        let at = run.started_at.clone().unwrap_or_default();
        entries.push((
            at.clone(),
            json!({
                "kind": "agent_run",
                "at": at,
                "agent": run.agent_name,
                "status": run.status,
                "cost": run.estimated_cost,
                "duration_ms": run.duration_ms,
            }),
        ));
    }

    for job in crate::db::job_queries::get_job_history(&state.pool, None, limit).await? {
        let at = job.executed_at.clone().unwrap_or_default();
        entries.push((
            at.clone(),
            json!({
                "kind": "job",
                "at": at,
                "job_id": job.job_id,
                "status": job.status,
                "duration_ms": job.duration_ms,
                "summary": job.result_summary,
            }),
        ));
    }

    let errors: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT created_at, source, severity, message FROM error_log \
         ORDER BY created_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;
    for (at, source, severity, message) in errors {
        entries.push((
            at.clone(),
            json!({
                "kind": "error",
                "at": at,
                "source": source,
                "severity": severity,
                "message": message,
            }),
        ));
    }

    entries.sort_by(|a, b| b.0.cmp(&a.0));
    entries.truncate(limit as usize);

    Ok(Json(
        entries.into_iter().map(|(_, v)| v).collect::<Vec<_>>(),
    ))
}

// ==============================================================================
// Settings
// ==============================================================================

async fn all_settings(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.settings.all().await?))
}

#[derive(Debug, Deserialize)]
struct PutSettingRequest {
    value: String,
}

async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<PutSettingRequest>,
) -> Result<impl IntoResponse, AppError> {
    // Changing the refresh cadence takes effect immediately, so validate the
    // value before anything is stored.
    let refresh_seconds = if key == crate::services::settings_service::KEY_PRICE_REFRESH_INTERVAL {
        Some(
            req.value
                .parse::<u64>()
                .map_err(|_| AppError::Validation("value must be an integer".to_string()))?,
        )
    } else {
        None
    };

    state.settings.set(&key, &req.value).await?;
    if let Some(seconds) = refresh_seconds {
        state.jobs.reschedule("price_refresh", seconds).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}
