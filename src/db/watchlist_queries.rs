use crate::models::stock::{Stock, Watchlist, WatchlistStock};
use sqlx::SqlitePool;

// ==============================================================================
// Stocks
// ==============================================================================

pub async fn add_stock(
    pool: &SqlitePool,
    ticker: &str,
    name: Option<&str>,
    market: &str,
) -> Result<Stock, sqlx::Error> {
    sqlx::query(
        "INSERT INTO stocks (ticker, name, market, active) VALUES (?, ?, ?, 1) \
         ON CONFLICT(ticker) DO UPDATE SET active = 1, name = COALESCE(excluded.name, stocks.name)",
    )
    .bind(ticker)
    .bind(name)
    .bind(market)
    .execute(pool)
    .await?;

    get_stock(pool, ticker)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn get_stock(pool: &SqlitePool, ticker: &str) -> Result<Option<Stock>, sqlx::Error> {
    sqlx::query_as::<_, Stock>("SELECT * FROM stocks WHERE ticker = ?")
        .bind(ticker)
        .fetch_optional(pool)
        .await
}

pub async fn list_stocks(pool: &SqlitePool) -> Result<Vec<Stock>, sqlx::Error> {
    sqlx::query_as::<_, Stock>("SELECT * FROM stocks ORDER BY ticker ASC")
        .fetch_all(pool)
        .await
}

pub async fn set_stock_active(
    pool: &SqlitePool,
    ticker: &str,
    active: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE stocks SET active = ? WHERE ticker = ?")
        .bind(active as i64)
        .bind(ticker)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_stock(pool: &SqlitePool, ticker: &str) -> Result<bool, sqlx::Error> {
    sqlx::query("DELETE FROM watchlist_stocks WHERE ticker = ?")
        .bind(ticker)
        .execute(pool)
        .await?;
    let result = sqlx::query("DELETE FROM stocks WHERE ticker = ?")
        .bind(ticker)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// All active tickers — the set every periodic job operates on.
pub async fn active_tickers(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT ticker FROM stocks WHERE active = 1 ORDER BY ticker")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(t,)| t).collect())
}

// ==============================================================================
// Watchlists
// ==============================================================================

pub async fn create_watchlist(pool: &SqlitePool, name: &str) -> Result<Watchlist, sqlx::Error> {
    let (max_order,): (Option<i64>,) =
        sqlx::query_as("SELECT MAX(sort_order) FROM watchlists")
            .fetch_one(pool)
            .await?;

    sqlx::query("INSERT INTO watchlists (name, sort_order) VALUES (?, ?)")
        .bind(name)
        .bind(max_order.unwrap_or(-1) + 1)
        .execute(pool)
        .await?;

    sqlx::query_as::<_, Watchlist>("SELECT * FROM watchlists WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
}

pub async fn get_watchlist(pool: &SqlitePool, id: i64) -> Result<Option<Watchlist>, sqlx::Error> {
    sqlx::query_as::<_, Watchlist>("SELECT * FROM watchlists WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_watchlists(pool: &SqlitePool) -> Result<Vec<Watchlist>, sqlx::Error> {
    sqlx::query_as::<_, Watchlist>("SELECT * FROM watchlists ORDER BY sort_order ASC, name ASC")
        .fetch_all(pool)
        .await
}

pub async fn count_watchlists(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlists")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn rename_watchlist(
    pool: &SqlitePool,
    id: i64,
    name: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE watchlists SET name = ? WHERE id = ?")
        .bind(name)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_watchlist(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM watchlists WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ==============================================================================
// Watchlist membership
// ==============================================================================

pub async fn add_to_watchlist(
    pool: &SqlitePool,
    watchlist_id: i64,
    ticker: &str,
) -> Result<(), sqlx::Error> {
    let (max_order,): (Option<i64>,) =
        sqlx::query_as("SELECT MAX(sort_order) FROM watchlist_stocks WHERE watchlist_id = ?")
            .bind(watchlist_id)
            .fetch_one(pool)
            .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO watchlist_stocks (watchlist_id, ticker, sort_order) \
         VALUES (?, ?, ?)",
    )
    .bind(watchlist_id)
    .bind(ticker)
    .bind(max_order.unwrap_or(-1) + 1)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_from_watchlist(
    pool: &SqlitePool,
    watchlist_id: i64,
    ticker: &str,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM watchlist_stocks WHERE watchlist_id = ? AND ticker = ?")
            .bind(watchlist_id)
            .bind(ticker)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn watchlist_members(
    pool: &SqlitePool,
    watchlist_id: i64,
) -> Result<Vec<WatchlistStock>, sqlx::Error> {
    sqlx::query_as::<_, WatchlistStock>(
        "SELECT watchlist_id, ticker, sort_order FROM watchlist_stocks \
         WHERE watchlist_id = ? ORDER BY sort_order ASC, ticker ASC",
    )
    .bind(watchlist_id)
    .fetch_all(pool)
    .await
}

/// Drag-reorder: rewrite sort_order to match the submitted ticker order.
/// Tickers not in the list keep their relative order after the listed ones.
pub async fn reorder_watchlist(
    pool: &SqlitePool,
    watchlist_id: i64,
    tickers: &[String],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for (position, ticker) in tickers.iter().enumerate() {
        sqlx::query(
            "UPDATE watchlist_stocks SET sort_order = ? WHERE watchlist_id = ? AND ticker = ?",
        )
        .bind(position as i64)
        .bind(watchlist_id)
        .bind(ticker)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
