use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::db::watchlist_queries;
use crate::errors::AppError;
use crate::models::alert::is_valid_ticker;
use crate::models::stock::{CreateWatchlistRequest, CsvImportResponse, RenameWatchlistRequest, ReorderRequest};
use crate::state::AppState;

const CSV_MAX_BYTES: usize = 1024 * 1024;
const CSV_MAX_ROWS: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/watchlists", get(list_watchlists))
        .route("/watchlists", post(create_watchlist))
        .route("/watchlists/:id", put(rename_watchlist))
        .route("/watchlists/:id", delete(delete_watchlist))
        .route("/watchlists/:id/stocks", get(members))
        .route("/watchlists/:id/stocks/:ticker", post(add_member))
        .route("/watchlists/:id/stocks/:ticker", delete(remove_member))
        .route("/watchlists/:id/reorder", put(reorder))
        .route("/watchlists/:id/import", post(import_csv))
}

async fn list_watchlists(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let watchlists = watchlist_queries::list_watchlists(&state.pool).await?;
    Ok(Json(watchlists))
}

async fn create_watchlist(
    State(state): State<AppState>,
    Json(req): Json<CreateWatchlistRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    let created = watchlist_queries::create_watchlist(&state.pool, name)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => {
                AppError::Duplicate(format!("watchlist {name:?} already exists"))
            }
            _ => AppError::Db(e),
        })?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn rename_watchlist(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RenameWatchlistRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if !watchlist_queries::rename_watchlist(&state.pool, id, name).await? {
        return Err(AppError::NotFound("watchlist".to_string()));
    }
    Ok(Json(watchlist_queries::get_watchlist(&state.pool, id).await?))
}

async fn delete_watchlist(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    // At least one watchlist must always exist.
    if watchlist_queries::count_watchlists(&state.pool).await? <= 1 {
        return Err(AppError::Validation(
            "cannot delete the last watchlist".to_string(),
        ));
    }
    if !watchlist_queries::delete_watchlist(&state.pool, id).await? {
        return Err(AppError::NotFound("watchlist".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn members(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    watchlist_queries::get_watchlist(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("watchlist".to_string()))?;
    Ok(Json(watchlist_queries::watchlist_members(&state.pool, id).await?))
}

async fn add_member(
    State(state): State<AppState>,
    Path((id, ticker)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    let ticker = ticker.to_uppercase();
    watchlist_queries::get_watchlist(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("watchlist".to_string()))?;
    watchlist_queries::get_stock(&state.pool, &ticker)
        .await?
        .ok_or_else(|| AppError::TickerNotFound(ticker.clone()))?;
    watchlist_queries::add_to_watchlist(&state.pool, id, &ticker).await?;
    Ok(StatusCode::CREATED)
}

async fn remove_member(
    State(state): State<AppState>,
    Path((id, ticker)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    if !watchlist_queries::remove_from_watchlist(&state.pool, id, &ticker.to_uppercase()).await? {
        return Err(AppError::NotFound("watchlist entry".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.tickers.is_empty() {
        return Err(AppError::Validation("tickers must be non-empty".to_string()));
    }
    let tickers: Vec<String> = req.tickers.iter().map(|t| t.to_uppercase()).collect();
    watchlist_queries::reorder_watchlist(&state.pool, id, &tickers).await?;
    Ok(Json(json!({"reordered": tickers.len()})))
}

/// CSV import: at most 1 MiB / 500 rows, with a case-insensitive `symbol`
/// column. Invalid rows are reported back rather than aborting the import.
async fn import_csv(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    if body.len() > CSV_MAX_BYTES {
        return Err(AppError::PayloadTooLarge);
    }
    watchlist_queries::get_watchlist(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("watchlist".to_string()))?;

    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("invalid CSV: {e}")))?
        .clone();
    let symbol_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("symbol"))
        .ok_or_else(|| AppError::Validation("CSV must have a 'symbol' column".to_string()))?;
    let name_idx = headers.iter().position(|h| h.eq_ignore_ascii_case("name"));

    let mut added = 0;
    let mut skipped = 0;
    let mut failed_rows = Vec::new();

    for (row_number, record) in reader.records().enumerate() {
        if row_number >= CSV_MAX_ROWS {
            return Err(AppError::Validation(format!(
                "CSV exceeds {CSV_MAX_ROWS} rows"
            )));
        }
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                failed_rows.push(format!("row {}: {}", row_number + 2, e));
                continue;
            }
        };
        let Some(raw) = record.get(symbol_idx) else {
            skipped += 1;
            continue;
        };
        let ticker = raw.trim().to_uppercase();
        if ticker.is_empty() {
            skipped += 1;
            continue;
        }
        if !is_valid_ticker(&ticker) {
            failed_rows.push(format!("row {}: invalid symbol {:?}", row_number + 2, raw));
            continue;
        }
        let name = name_idx.and_then(|i| record.get(i)).map(|n| n.trim());

        match watchlist_queries::add_stock(&state.pool, &ticker, name.filter(|n| !n.is_empty()), "US")
            .await
        {
            Ok(_) => {
                watchlist_queries::add_to_watchlist(&state.pool, id, &ticker).await?;
                added += 1;
            }
            Err(e) => {
                warn!("CSV import: failed to add {}: {}", ticker, e);
                failed_rows.push(format!("row {}: {}", row_number + 2, ticker));
            }
        }
    }

    info!("CSV import into watchlist {}: {} added, {} skipped", id, added, skipped);
    Ok(Json(CsvImportResponse { added, skipped, failed_rows }))
}
