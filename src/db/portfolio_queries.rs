use chrono::Utc;
use sqlx::SqlitePool;

// ==============================================================================
// Portfolio
// ==============================================================================

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PortfolioPosition {
    pub id: i64,
    pub ticker: String,
    pub quantity: f64,
    pub cost_basis: f64,
    pub created_at: Option<String>,
}

pub async fn list_positions(pool: &SqlitePool) -> Result<Vec<PortfolioPosition>, sqlx::Error> {
    sqlx::query_as::<_, PortfolioPosition>(
        "SELECT * FROM portfolio_positions ORDER BY ticker ASC",
    )
    .fetch_all(pool)
    .await
}

pub async fn insert_snapshot(
    pool: &SqlitePool,
    snapshot_date: &str,
    total_value: f64,
    total_cost: f64,
    positions_json: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO portfolio_snapshots \
         (snapshot_date, total_value, total_cost, positions, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(snapshot_date)
    .bind(total_value)
    .bind(total_cost)
    .bind(positions_json)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

// ==============================================================================
// Download stats (GitHub clone tracking)
// ==============================================================================

pub async fn insert_download_stat(
    pool: &SqlitePool,
    repo_owner: &str,
    repo_name: &str,
    total_clones: i64,
    unique_clones: i64,
    period_start: Option<&str>,
    period_end: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO download_stats \
         (repo_owner, repo_name, total_clones, unique_clones, period_start, period_end, recorded_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(repo_owner)
    .bind(repo_name)
    .bind(total_clones)
    .bind(unique_clones)
    .bind(period_start)
    .bind(period_end)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_download_daily(
    pool: &SqlitePool,
    repo_owner: &str,
    repo_name: &str,
    date: &str,
    clones: i64,
    unique_clones: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO download_daily (repo_owner, repo_name, date, clones, unique_clones) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(repo_owner, repo_name, date) DO UPDATE SET \
           clones = MAX(download_daily.clones, excluded.clones), \
           unique_clones = MAX(download_daily.unique_clones, excluded.unique_clones)",
    )
    .bind(repo_owner)
    .bind(repo_name)
    .bind(date)
    .bind(clones)
    .bind(unique_clones)
    .execute(pool)
    .await?;
    Ok(())
}
