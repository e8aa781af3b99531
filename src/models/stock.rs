use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ==============================================================================
// Watchlist Models
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stock {
    pub ticker: String,
    pub name: Option<String>,
    pub market: Option<String>,
    pub added_at: Option<String>,
    pub active: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Watchlist {
    pub id: i64,
    pub name: String,
    pub sort_order: i64,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WatchlistStock {
    pub watchlist_id: i64,
    pub ticker: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddStockRequest {
    pub ticker: String,
    pub name: Option<String>,
    pub market: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWatchlistRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameWatchlistRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReorderRequest {
    pub tickers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CsvImportResponse {
    pub added: usize,
    pub skipped: usize,
    pub failed_rows: Vec<String>,
}
