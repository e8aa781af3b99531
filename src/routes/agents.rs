use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::db::agent_queries;
use crate::errors::AppError;
use crate::models::agent::RunAgentRequest;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents/known", get(known_agents))
        .route("/agents/run", post(run_agent))
        .route("/agents/history", get(run_history))
        .route("/agents/costs", get(costs))
}

async fn known_agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agents.known_agents())
}

async fn run_agent(
    State(state): State<AppState>,
    Json(req): Json<RunAgentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.agent.trim().is_empty() {
        return Err(AppError::Validation("agent is required".to_string()));
    }
    let (result, run_id) = state.agents.run(&req.agent, &req.inputs).await?;
    Ok(Json(json!({
        "run_id": run_id,
        "output": result.output,
        "tokens_input": result.tokens_input,
        "tokens_output": result.tokens_output,
        "estimated_cost": result.estimated_cost,
    })))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    agent: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
}

async fn run_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    let agent = params
        .agent
        .as_deref()
        .map(crate::services::agent_service::resolve_agent_name);

    let runs = agent_queries::list_runs(&state.pool, agent, page, page_size).await?;
    Ok(Json(json!({
        "page": page,
        "page_size": page_size,
        "runs": runs,
    })))
}

#[derive(Debug, Deserialize)]
struct CostParams {
    window: Option<i64>,
}

async fn costs(
    State(state): State<AppState>,
    Query(params): Query<CostParams>,
) -> Result<impl IntoResponse, AppError> {
    let window = match params.window.unwrap_or(7) {
        w @ (1 | 7 | 30) => w,
        other => {
            return Err(AppError::Validation(format!(
                "window must be 1, 7, or 30 days, got {other}"
            )))
        }
    };
    Ok(Json(state.agents.cost_summary(window).await?))
}
