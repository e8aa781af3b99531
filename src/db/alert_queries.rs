use crate::models::alert::PriceAlert;
use chrono::Utc;
use sqlx::SqlitePool;

const ALERT_COLUMNS: &str = "id, ticker, condition_type, threshold, enabled, sound_type, \
     triggered_at, notification_sent, fired_at, fire_count, created_at";

pub async fn get_all_alerts(pool: &SqlitePool) -> Result<Vec<PriceAlert>, sqlx::Error> {
    sqlx::query_as::<_, PriceAlert>(&format!(
        "SELECT {ALERT_COLUMNS} FROM price_alerts ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
}

/// Enabled, not-yet-triggered alerts.
pub async fn get_active_alerts(pool: &SqlitePool) -> Result<Vec<PriceAlert>, sqlx::Error> {
    sqlx::query_as::<_, PriceAlert>(&format!(
        "SELECT {ALERT_COLUMNS} FROM price_alerts \
         WHERE enabled = 1 AND triggered_at IS NULL ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
}

pub async fn get_alert(pool: &SqlitePool, id: i64) -> Result<Option<PriceAlert>, sqlx::Error> {
    sqlx::query_as::<_, PriceAlert>(&format!(
        "SELECT {ALERT_COLUMNS} FROM price_alerts WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn create_alert(
    pool: &SqlitePool,
    ticker: &str,
    condition_type: &str,
    threshold: f64,
    sound_type: &str,
) -> Result<PriceAlert, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO price_alerts (ticker, condition_type, threshold, sound_type) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(ticker)
    .bind(condition_type)
    .bind(threshold)
    .bind(sound_type)
    .execute(pool)
    .await?;

    get_alert(pool, result.last_insert_rowid())
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn update_alert(
    pool: &SqlitePool,
    id: i64,
    condition_type: Option<&str>,
    threshold: Option<f64>,
    sound_type: Option<&str>,
) -> Result<Option<PriceAlert>, sqlx::Error> {
    if let Some(condition) = condition_type {
        sqlx::query("UPDATE price_alerts SET condition_type = ? WHERE id = ?")
            .bind(condition)
            .bind(id)
            .execute(pool)
            .await?;
    }
    if let Some(threshold) = threshold {
        sqlx::query("UPDATE price_alerts SET threshold = ? WHERE id = ?")
            .bind(threshold)
            .bind(id)
            .execute(pool)
            .await?;
    }
    if let Some(sound) = sound_type {
        sqlx::query("UPDATE price_alerts SET sound_type = ? WHERE id = ?")
            .bind(sound)
            .bind(id)
            .execute(pool)
            .await?;
    }
    get_alert(pool, id).await
}

pub async fn toggle_alert(pool: &SqlitePool, id: i64) -> Result<Option<PriceAlert>, sqlx::Error> {
    sqlx::query(
        "UPDATE price_alerts SET enabled = CASE WHEN enabled = 1 THEN 0 ELSE 1 END WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await?;
    get_alert(pool, id).await
}

pub async fn delete_alert(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM price_alerts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_alert_sound(
    pool: &SqlitePool,
    id: i64,
    sound_type: &str,
) -> Result<Option<PriceAlert>, sqlx::Error> {
    let result = sqlx::query("UPDATE price_alerts SET sound_type = ? WHERE id = ?")
        .bind(sound_type)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_alert(pool, id).await
}

/// Record a fire: sets triggered_at + fired_at, bumps fire_count, marks the
/// notification sent. Future evaluations skip this alert until re-armed.
pub async fn mark_alert_fired(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "UPDATE price_alerts \
         SET triggered_at = ?, fired_at = ?, fire_count = fire_count + 1, notification_sent = 1 \
         WHERE id = ?",
    )
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear triggered_at so the alert can fire again.
pub async fn rearm_alert(pool: &SqlitePool, id: i64) -> Result<Option<PriceAlert>, sqlx::Error> {
    let result = sqlx::query("UPDATE price_alerts SET triggered_at = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_alert(pool, id).await
}
