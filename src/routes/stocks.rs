use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::db::watchlist_queries;
use crate::errors::AppError;
use crate::models::alert::is_valid_ticker;
use crate::models::stock::AddStockRequest;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stocks", get(list_stocks))
        .route("/stocks", post(add_stock))
        .route("/stocks/search", get(search))
        .route("/stocks/:ticker", delete(remove_stock))
        .route("/stocks/:ticker/toggle", post(toggle_stock))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
}

async fn list_stocks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let stocks = watchlist_queries::list_stocks(&state.pool).await?;
    Ok(Json(stocks))
}

async fn add_stock(
    State(state): State<AppState>,
    Json(req): Json<AddStockRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ticker = req.ticker.trim().to_uppercase();
    if !is_valid_ticker(&ticker) {
        return Err(AppError::Validation(format!(
            "ticker must be 1-5 uppercase letters, got {:?}",
            req.ticker
        )));
    }
    let market = req.market.as_deref().unwrap_or("US");

    // Resolve the company name when the caller did not supply one.
    let name = match req.name {
        Some(name) => Some(name),
        None => state
            .providers
            .search_ticker(&ticker)
            .await
            .into_iter()
            .find(|m| m.ticker.eq_ignore_ascii_case(&ticker))
            .map(|m| m.name),
    };

    let stock = watchlist_queries::add_stock(&state.pool, &ticker, name.as_deref(), market).await?;
    watchlist_queries::add_to_watchlist(&state.pool, 1, &ticker).await?;
    info!("added stock {} to the watchlist", ticker);

    Ok((StatusCode::CREATED, Json(stock)))
}

async fn remove_stock(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ticker = ticker.to_uppercase();
    if !watchlist_queries::remove_stock(&state.pool, &ticker).await? {
        return Err(AppError::TickerNotFound(ticker));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_stock(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let ticker = ticker.to_uppercase();
    let stock = watchlist_queries::get_stock(&state.pool, &ticker)
        .await?
        .ok_or_else(|| AppError::TickerNotFound(ticker.clone()))?;
    watchlist_queries::set_stock_active(&state.pool, &ticker, stock.active == 0).await?;
    let updated = watchlist_queries::get_stock(&state.pool, &ticker).await?;
    Ok(Json(updated))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(AppError::Validation("q is required".to_string()));
    }
    let results = state.providers.search_ticker(query).await;
    Ok(Json(results))
}
