use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::rating_queries;
use crate::errors::AppError;
use crate::models::market::HistoryPeriod;
use crate::services::sentiment_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analysis/ratings", get(list_ratings))
        .route("/analysis/chart/:ticker", get(chart_data))
        .route("/sentiment/:ticker", get(sentiment))
}

async fn list_ratings(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(rating_queries::list_ratings(&state.pool).await?))
}

#[derive(Debug, Deserialize)]
struct ChartParams {
    period: Option<String>,
}

async fn chart_data(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<ChartParams>,
) -> Result<impl IntoResponse, AppError> {
    let ticker = ticker.to_uppercase();
    let period = match params.period.as_deref() {
        Some(raw) => HistoryPeriod::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("invalid period: {raw:?}")))?,
        None => HistoryPeriod::OneMonth,
    };

    let history = state
        .providers
        .get_historical(&ticker, period)
        .await
        .ok_or_else(|| AppError::ProviderUnavailable(format!("no history for {ticker}")))?;
    Ok(Json(history))
}

async fn sentiment(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ticker = ticker.to_uppercase();
    Ok(Json(sentiment_service::get_sentiment(&state.pool, &ticker).await))
}
