use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::db::comparison_queries;
use crate::errors::AppError;
use crate::llm::fanout;
use crate::llm::providers::{test_provider_connection, ProviderFactory};
use crate::models::comparison::{CompareRequest, ComparisonRunView, CreateComparisonRunRequest};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Synchronous multi-model compare
        .route("/ai/compare", post(sync_compare))
        // Asynchronous comparison runs with polling
        .route("/comparison/run", post(create_run))
        .route("/comparison/run/:id", get(poll_run))
        .route("/comparison/runs", get(list_runs))
        // AI provider settings
        .route("/ai/providers", get(list_ai_providers))
        .route("/ai/providers", post(upsert_ai_provider))
        .route("/ai/providers/:name", delete(delete_ai_provider))
        .route("/ai/providers/test", post(test_ai_provider))
}

async fn sync_compare(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(fanout::run_sync_compare(&state.pool, &state.config, req).await?))
}

async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<CreateComparisonRunRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run_id = fanout::create_comparison_run(&state.pool, &state.config, req).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"run_id": run_id, "status": "pending"}))))
}

/// Poll endpoint: returns the run plus whatever results have landed so far,
/// supporting partial progress display.
async fn poll_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let run = comparison_queries::get_run(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("comparison run".to_string()))?;
    let results = comparison_queries::results_for_run(&state.pool, &id).await?;
    Ok(Json(ComparisonRunView { run, results }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    Ok(Json(comparison_queries::list_runs(&state.pool, limit).await?))
}

// ==============================================================================
// AI provider settings
// ==============================================================================

async fn list_ai_providers(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let configured = comparison_queries::configured_providers(&state.pool).await?;
    Ok(Json(json!({
        "available": ProviderFactory::available_providers(),
        "configured": configured
            .iter()
            .map(|p| json!({
                "id": p.id,
                "provider_name": p.provider_name,
                "model": p.model,
                // Keys never leave the server; only their presence does.
                "has_key": !p.api_key.is_empty(),
            }))
            .collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
struct UpsertProviderRequest {
    provider_name: String,
    api_key: String,
    model: Option<String>,
}

async fn upsert_ai_provider(
    State(state): State<AppState>,
    Json(req): Json<UpsertProviderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = req.provider_name.to_lowercase();
    if !ProviderFactory::PROVIDER_IDS.contains(&name.as_str()) {
        return Err(AppError::Validation(format!(
            "provider_name must be one of {:?}",
            ProviderFactory::PROVIDER_IDS
        )));
    }
    if req.api_key.trim().is_empty() {
        return Err(AppError::Validation("api_key is required".to_string()));
    }
    comparison_queries::upsert_provider(&state.pool, &name, req.api_key.trim(), req.model.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_ai_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !comparison_queries::delete_provider(&state.pool, &name.to_lowercase()).await? {
        return Err(AppError::NotFound("provider".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TestProviderRequest {
    provider_name: String,
    api_key: Option<String>,
    model: Option<String>,
}

async fn test_ai_provider(
    State(state): State<AppState>,
    Json(req): Json<TestProviderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = req.provider_name.to_lowercase();
    let api_key = match req.api_key {
        Some(key) if !key.trim().is_empty() => key,
        _ => comparison_queries::provider_api_key(&state.pool, &name)
            .await?
            .ok_or_else(|| AppError::Validation(format!("no API key stored for {name}")))?,
    };
    Ok(Json(test_provider_connection(&name, api_key, req.model).await))
}
