//! Schema-migration behaviour against an on-disk database file, covering
//! the upgrade path from a store that predates the live price columns.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

use tickerpulse_backend::db::schema::init_all_tables;

async fn file_pool(dir: &TempDir) -> SqlitePool {
    let path = dir.path().join("tickerpulse.db");
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

async fn columns(pool: &SqlitePool, table: &str) -> Vec<String> {
    sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

#[tokio::test]
async fn migration_adds_price_columns_and_preserves_rows() {
    let dir = TempDir::new().unwrap();

    // A v-old database: ai_ratings without the live price columns.
    {
        let pool = file_pool(&dir).await;
        sqlx::query(
            "CREATE TABLE ai_ratings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL UNIQUE,
                rating TEXT NOT NULL DEFAULT 'HOLD',
                score REAL NOT NULL DEFAULT 0,
                confidence REAL NOT NULL DEFAULT 0,
                updated_at TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (ticker, rating) in [("AAPL", "BUY"), ("MSFT", "HOLD")] {
            sqlx::query("INSERT INTO ai_ratings (ticker, rating, score) VALUES (?, ?, 60)")
                .bind(ticker)
                .bind(rating)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
    }

    // Re-open and initialise: the migration pass adds the columns.
    let pool = file_pool(&dir).await;
    init_all_tables(&pool).await.unwrap();

    let cols = columns(&pool, "ai_ratings").await;
    for expected in [
        "ticker",
        "rating",
        "score",
        "confidence",
        "current_price",
        "price_change",
        "price_change_pct",
    ] {
        assert!(cols.contains(&expected.to_string()), "missing column {expected}");
    }

    // Row counts and values unchanged.
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ai_ratings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
    let (rating,): (String,) = sqlx::query_as("SELECT rating FROM ai_ratings WHERE ticker = 'AAPL'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rating, "BUY");

    // Second initialisation: no errors, no duplicate columns.
    init_all_tables(&pool).await.unwrap();
    let cols = columns(&pool, "ai_ratings").await;
    assert_eq!(cols.iter().filter(|c| c.as_str() == "current_price").count(), 1);
}

#[tokio::test]
async fn fresh_database_gets_full_schema_and_seed() {
    let dir = TempDir::new().unwrap();
    let pool = file_pool(&dir).await;
    init_all_tables(&pool).await.unwrap();

    for table in [
        "stocks",
        "watchlists",
        "watchlist_stocks",
        "ai_ratings",
        "price_alerts",
        "sentiment_cache",
        "earnings_events",
        "job_history",
        "agent_runs",
        "scheduler_jobs",
        "agent_schedules",
        "perf_snapshots",
        "api_request_log",
        "performance_metrics",
        "comparison_runs",
        "comparison_results",
        "error_log",
        "ui_state",
    ] {
        let cols = columns(&pool, table).await;
        assert!(!cols.is_empty(), "table {table} missing");
    }

    // The default watchlist is seeded.
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlists")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
