use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::services::latency_buffer::AggregatedRow;

pub const PERF_SNAPSHOT_RETENTION_DAYS: i64 = 90;
pub const API_LOG_RETENTION_DAYS: i64 = 30;
pub const API_LOG_ROW_CAP: i64 = 10_000;
pub const UI_STATE_RETENTION_DAYS: i64 = 90;

// ==============================================================================
// System snapshots
// ==============================================================================

pub async fn insert_perf_snapshot(
    pool: &SqlitePool,
    cpu_pct: f64,
    mem_pct: f64,
    db_pool_in_use: i64,
    db_pool_idle: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO perf_snapshots (cpu_pct, mem_pct, db_pool_in_use, db_pool_idle, recorded_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(cpu_pct)
    .bind(mem_pct)
    .bind(db_pool_in_use)
    .bind(db_pool_idle)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_perf_snapshots(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<(Option<f64>, Option<f64>, Option<i64>, Option<i64>, Option<String>)>, sqlx::Error>
{
    sqlx::query_as(
        "SELECT cpu_pct, mem_pct, db_pool_in_use, db_pool_idle, recorded_at \
         FROM perf_snapshots ORDER BY recorded_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

// ==============================================================================
// API request log
// ==============================================================================

/// Flush aggregated latency rows: accumulate call_count, overwrite p95/avg.
pub async fn flush_api_request_log(
    pool: &SqlitePool,
    rows: &[AggregatedRow],
) -> Result<(), sqlx::Error> {
    for row in rows {
        sqlx::query(
            "INSERT INTO api_request_log \
             (endpoint, method, status_class, call_count, p95_ms, avg_ms, log_date) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(endpoint, method, status_class, log_date) DO UPDATE SET \
               call_count = api_request_log.call_count + excluded.call_count, \
               p95_ms = excluded.p95_ms, \
               avg_ms = excluded.avg_ms",
        )
        .bind(&row.endpoint)
        .bind(&row.method)
        .bind(&row.status_class)
        .bind(row.call_count)
        .bind(row.p95_ms)
        .bind(row.avg_ms)
        .bind(&row.log_date)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn endpoint_stats(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<(String, String, String, i64, Option<f64>, Option<f64>, String)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT endpoint, method, status_class, call_count, p95_ms, avg_ms, log_date \
         FROM api_request_log ORDER BY log_date DESC, call_count DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

// ==============================================================================
// Pruning
// ==============================================================================

pub async fn prune_metrics_tables(pool: &SqlitePool) -> Result<(u64, u64, u64), sqlx::Error> {
    let perf_cutoff = (Utc::now() - Duration::days(PERF_SNAPSHOT_RETENTION_DAYS)).to_rfc3339();
    let perf = sqlx::query("DELETE FROM perf_snapshots WHERE recorded_at < ?")
        .bind(perf_cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    let api_cutoff = (Utc::now() - Duration::days(API_LOG_RETENTION_DAYS))
        .format("%Y-%m-%d")
        .to_string();
    let mut api = sqlx::query("DELETE FROM api_request_log WHERE log_date < ?")
        .bind(api_cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    // Hard cap: keep the newest API_LOG_ROW_CAP rows.
    api += sqlx::query(
        "DELETE FROM api_request_log WHERE id NOT IN \
         (SELECT id FROM api_request_log ORDER BY log_date DESC, id DESC LIMIT ?)",
    )
    .bind(API_LOG_ROW_CAP)
    .execute(pool)
    .await?
    .rows_affected();

    let ui_cutoff = (Utc::now() - Duration::days(UI_STATE_RETENTION_DAYS)).to_rfc3339();
    let ui = sqlx::query("DELETE FROM ui_state WHERE updated_at < ?")
        .bind(ui_cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    Ok((perf, api, ui))
}

// ==============================================================================
// Error log
// ==============================================================================

#[allow(clippy::too_many_arguments)]
pub async fn insert_error(
    pool: &SqlitePool,
    source: &str,
    error_code: Option<&str>,
    message: &str,
    stack: Option<&str>,
    request_id: Option<&str>,
    context: Option<&str>,
    severity: &str,
    session_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO error_log \
         (source, error_code, message, stack, request_id, context, severity, session_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(source)
    .bind(error_code)
    .bind(message)
    .bind(stack)
    .bind(request_id)
    .bind(context)
    .bind(severity)
    .bind(session_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn error_stats(
    pool: &SqlitePool,
    window_days: i64,
) -> Result<Vec<(String, String, i64)>, sqlx::Error> {
    let cutoff = (Utc::now() - Duration::days(window_days)).to_rfc3339();
    sqlx::query_as(
        "SELECT source, severity, COUNT(*) FROM error_log \
         WHERE created_at >= ? GROUP BY source, severity ORDER BY 3 DESC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
}

// ==============================================================================
// UI state
// ==============================================================================

pub async fn put_ui_state(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ui_state (key, value, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_ui_state(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM ui_state WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(v,)| v))
}

// ==============================================================================
// Data provider rate-limit columns
// ==============================================================================

pub async fn flush_provider_rate_limit(
    pool: &SqlitePool,
    provider_name: &str,
    used: i64,
    max: i64,
    reset_at: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO data_providers_config (provider_name) VALUES (?)")
        .bind(provider_name)
        .execute(pool)
        .await?;
    sqlx::query(
        "UPDATE data_providers_config \
         SET rate_limit_used = ?, rate_limit_max = ?, reset_at = ? \
         WHERE provider_name = ?",
    )
    .bind(used)
    .bind(max)
    .bind(reset_at)
    .bind(provider_name)
    .execute(pool)
    .await?;
    Ok(())
}
