use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::db::earnings_queries;
use crate::errors::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/earnings/upcoming", get(upcoming))
        .route("/earnings/past", get(past))
        .route("/earnings/sync", post(manual_sync))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

async fn upcoming(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(earnings_queries::upcoming(&state.pool, limit).await?))
}

async fn past(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(earnings_queries::past(&state.pool, limit).await?))
}

/// Manual sync just fires the scheduled job immediately.
async fn manual_sync(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.jobs.trigger_now("earnings_sync").await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"triggered": "earnings_sync"}))))
}
