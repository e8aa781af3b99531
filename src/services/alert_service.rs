use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{alert_queries, rating_queries};
use crate::errors::AppError;
use crate::models::alert::{
    is_valid_ticker, validate_sound_type, CreateAlertRequest, PriceAlert, UpdateAlertRequest,
    CONDITION_TYPES, PCT_CHANGE_THRESHOLD_CAP,
};
use crate::services::broadcast::Broadcaster;
use crate::services::settings_service::{resolve_alert_sound_type, SettingsService};

// ==============================================================================
// CRUD with boundary validation
// ==============================================================================

pub async fn create_alert(
    pool: &SqlitePool,
    req: CreateAlertRequest,
) -> Result<PriceAlert, AppError> {
    let ticker = req.ticker.trim().to_uppercase();
    if !is_valid_ticker(&ticker) {
        return Err(AppError::Validation(format!(
            "ticker must be 1-5 uppercase letters, got {:?}",
            req.ticker
        )));
    }
    if !CONDITION_TYPES.contains(&req.condition_type.as_str()) {
        return Err(AppError::Validation(format!(
            "condition_type must be one of {:?}",
            CONDITION_TYPES
        )));
    }
    if !req.threshold.is_finite() || req.threshold <= 0.0 {
        return Err(AppError::Validation(
            "threshold must be a positive number".to_string(),
        ));
    }
    let threshold = if req.condition_type == "pct_change" {
        req.threshold.min(PCT_CHANGE_THRESHOLD_CAP)
    } else {
        req.threshold
    };
    let sound = validate_sound_type(req.sound_type.as_deref().unwrap_or("default"));

    Ok(alert_queries::create_alert(pool, &ticker, &req.condition_type, threshold, sound).await?)
}

pub async fn update_alert(
    pool: &SqlitePool,
    id: i64,
    req: UpdateAlertRequest,
) -> Result<PriceAlert, AppError> {
    if let Some(condition) = &req.condition_type {
        if !CONDITION_TYPES.contains(&condition.as_str()) {
            return Err(AppError::Validation(format!(
                "condition_type must be one of {:?}",
                CONDITION_TYPES
            )));
        }
    }
    if let Some(threshold) = req.threshold {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(AppError::Validation(
                "threshold must be a positive number".to_string(),
            ));
        }
    }
    let sound = req.sound_type.as_deref().map(validate_sound_type);

    alert_queries::update_alert(
        pool,
        id,
        req.condition_type.as_deref(),
        req.threshold,
        sound,
    )
    .await?
    .ok_or_else(|| AppError::NotFound("alert".to_string()))
}

// ==============================================================================
// Condition evaluation
// ==============================================================================

/// Whether an alert's condition holds at the given price / pct move.
pub fn condition_met(alert: &PriceAlert, price: f64, change_pct: f64) -> bool {
    match alert.condition_type.as_str() {
        "price_above" => price >= alert.threshold,
        "price_below" => price <= alert.threshold,
        "pct_change" => change_pct.abs() >= alert.threshold.min(PCT_CHANGE_THRESHOLD_CAP),
        _ => false,
    }
}

fn fire_message(alert: &PriceAlert, price: f64) -> String {
    match alert.condition_type.as_str() {
        "price_above" => format!("rose above ${:.2} (now ${:.2})", alert.threshold, price),
        "price_below" => format!("fell below ${:.2} (now ${:.2})", alert.threshold, price),
        "pct_change" => format!("moved ±{:.1}% (now ${:.2})", alert.threshold, price),
        _ => format!("triggered at ${:.2}", price),
    }
}

/// SSE payload for a fired (or test-fired) alert. Non-finite floats become
/// null through serde_json's f64 conversion.
pub fn build_sse_alert_payload(
    alert: &PriceAlert,
    current_price: Option<f64>,
    global_sound_type: &str,
    severity: &str,
    message: String,
    fire_count: i64,
) -> serde_json::Value {
    let resolved_sound = resolve_alert_sound_type(&alert.sound_type, global_sound_type);
    json!({
        "alert_id": alert.id,
        "ticker": alert.ticker,
        "condition_type": alert.condition_type,
        "threshold": alert.threshold,
        "current_price": current_price,
        "message": message,
        "sound_type": resolved_sound,
        "type": "price_alert",
        "severity": severity,
        "fire_count": fire_count,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Evaluate enabled, not-yet-triggered alerts against freshly persisted
/// prices. Called by the price refresh job after the DB write so alerts see
/// exactly the prices clients see. Only alerts whose ticker is in `tickers`
/// are considered.
pub async fn evaluate_alerts(
    pool: &SqlitePool,
    settings: &SettingsService,
    broadcaster: &Arc<Broadcaster>,
    tickers: &[String],
) -> Result<usize, AppError> {
    if tickers.is_empty() {
        return Ok(0);
    }

    let active = alert_queries::get_active_alerts(pool).await?;
    if active.is_empty() {
        return Ok(0);
    }

    let global = settings.global_sound_settings().await;
    let mut fired = 0;

    for alert in active {
        if !tickers.iter().any(|t| t == &alert.ticker) {
            continue;
        }

        let Some(rating) = rating_queries::get_rating(pool, &alert.ticker).await? else {
            continue;
        };
        let Some(price) = rating.current_price else {
            continue;
        };
        let change_pct = rating.price_change_pct.unwrap_or(0.0);

        if !condition_met(&alert, price, change_pct) {
            continue;
        }

        alert_queries::mark_alert_fired(pool, alert.id).await?;
        info!(
            "alert {} fired: {} {} {} at {:.4}",
            alert.id, alert.ticker, alert.condition_type, alert.threshold, price
        );

        let payload = build_sse_alert_payload(
            &alert,
            Some(price),
            &global.sound_type,
            "high",
            fire_message(&alert, price),
            alert.fire_count + 1,
        );
        // No listeners is normal; the DB row is the source of truth.
        let _ = broadcaster.send_event("alert", payload);
        fired += 1;
    }

    Ok(fired)
}

/// Build the same payload a real fire would produce, without mutating any
/// row. Backs the frontend's alert preview button.
pub async fn fire_test_alert(
    pool: &SqlitePool,
    settings: &SettingsService,
    broadcaster: &Arc<Broadcaster>,
    alert_id: i64,
) -> Result<serde_json::Value, AppError> {
    let alert = alert_queries::get_alert(pool, alert_id)
        .await?
        .ok_or_else(|| AppError::NotFound("alert".to_string()))?;

    let global = settings.global_sound_settings().await;
    let payload = build_sse_alert_payload(
        &alert,
        None,
        &global.sound_type,
        "info",
        format!("Test alert for {}", alert.ticker),
        0,
    );

    let _ = broadcaster.send_event("alert", payload.clone());
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_all_tables;
    use crate::models::market::PriceTick;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();
        pool
    }

    fn alert(condition: &str, threshold: f64) -> PriceAlert {
        PriceAlert {
            id: 1,
            ticker: "AAPL".into(),
            condition_type: condition.into(),
            threshold,
            enabled: 1,
            sound_type: "default".into(),
            triggered_at: None,
            notification_sent: 0,
            fired_at: None,
            fire_count: 0,
            created_at: None,
        }
    }

    async fn seed_price(pool: &SqlitePool, ticker: &str, price: f64, change_pct: f64) {
        let mut prices = HashMap::new();
        prices.insert(
            ticker.to_string(),
            PriceTick {
                price,
                change: price * change_pct / 100.0,
                change_pct,
                volume: 100,
                ts: 0,
            },
        );
        rating_queries::upsert_prices(pool, &prices).await.unwrap();
    }

    #[test]
    fn test_condition_boundaries() {
        // price_above fires iff p >= T
        assert!(condition_met(&alert("price_above", 200.0), 200.0, 0.0));
        assert!(condition_met(&alert("price_above", 200.0), 203.41, 0.0));
        assert!(!condition_met(&alert("price_above", 200.0), 199.99, 0.0));

        // price_below fires iff p <= T
        assert!(condition_met(&alert("price_below", 200.0), 200.0, 0.0));
        assert!(condition_met(&alert("price_below", 200.0), 150.0, 0.0));
        assert!(!condition_met(&alert("price_below", 200.0), 200.01, 0.0));

        // pct_change fires on |pct| >= T, either direction
        assert!(condition_met(&alert("pct_change", 2.0), 100.0, 2.0));
        assert!(condition_met(&alert("pct_change", 2.0), 100.0, -2.5));
        assert!(!condition_met(&alert("pct_change", 2.0), 100.0, 1.9));

        // pct_change threshold is capped at 100
        assert!(condition_met(&alert("pct_change", 500.0), 100.0, 100.0));
    }

    #[test]
    fn test_fire_messages() {
        assert_eq!(
            fire_message(&alert("price_above", 200.0), 203.41),
            "rose above $200.00 (now $203.41)"
        );
        assert_eq!(
            fire_message(&alert("price_below", 100.0), 97.5),
            "fell below $100.00 (now $97.50)"
        );
    }

    #[tokio::test]
    async fn test_alert_fires_exactly_once() {
        let pool = test_pool().await;
        let settings = SettingsService::new(pool.clone());
        let broadcaster = Arc::new(Broadcaster::new(50));
        let (_sse, mut rx) = broadcaster.register_sse();

        settings.set("alert_sound_type", "chime").await.unwrap();
        alert_queries::create_alert(&pool, "AAPL", "price_above", 200.0, "default")
            .await
            .unwrap();
        seed_price(&pool, "AAPL", 205.0, 2.5).await;

        let fired = evaluate_alerts(&pool, &settings, &broadcaster, &["AAPL".to_string()])
            .await
            .unwrap();
        assert_eq!(fired, 1);

        let row = alert_queries::get_alert(&pool, 1).await.unwrap().unwrap();
        assert!(row.triggered_at.is_some());
        assert!(row.fired_at.is_some());
        assert_eq!(row.fire_count, 1);
        assert_eq!(row.notification_sent, 1);
        // The stored row keeps 'default'; only the payload carries the
        // resolved sound.
        assert_eq!(row.sound_type, "default");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "alert");
        assert_eq!(event.data["sound_type"], "chime");
        assert_eq!(event.data["severity"], "high");
        assert_eq!(event.data["fire_count"], 1);
        assert!(event.data["message"]
            .as_str()
            .unwrap()
            .starts_with("rose above $200.00"));

        // Second tick at a higher price must NOT re-fire.
        seed_price(&pool, "AAPL", 210.0, 2.4).await;
        let fired = evaluate_alerts(&pool, &settings, &broadcaster, &["AAPL".to_string()])
            .await
            .unwrap();
        assert_eq!(fired, 0);
        let row = alert_queries::get_alert(&pool, 1).await.unwrap().unwrap();
        assert_eq!(row.fire_count, 1);
    }

    #[tokio::test]
    async fn test_evaluation_scoped_to_fresh_tickers() {
        let pool = test_pool().await;
        let settings = SettingsService::new(pool.clone());
        let broadcaster = Arc::new(Broadcaster::new(50));

        alert_queries::create_alert(&pool, "MSFT", "price_above", 100.0, "default")
            .await
            .unwrap();
        seed_price(&pool, "MSFT", 297.0, -1.0).await;

        // MSFT's price would fire, but MSFT is not in the fresh set.
        let fired = evaluate_alerts(&pool, &settings, &broadcaster, &["AAPL".to_string()])
            .await
            .unwrap();
        assert_eq!(fired, 0);
    }

    #[tokio::test]
    async fn test_rearm_allows_second_fire() {
        let pool = test_pool().await;
        let settings = SettingsService::new(pool.clone());
        let broadcaster = Arc::new(Broadcaster::new(50));

        alert_queries::create_alert(&pool, "AAPL", "price_above", 200.0, "default")
            .await
            .unwrap();
        seed_price(&pool, "AAPL", 205.0, 2.5).await;

        evaluate_alerts(&pool, &settings, &broadcaster, &["AAPL".to_string()])
            .await
            .unwrap();
        alert_queries::rearm_alert(&pool, 1).await.unwrap();

        let fired = evaluate_alerts(&pool, &settings, &broadcaster, &["AAPL".to_string()])
            .await
            .unwrap();
        assert_eq!(fired, 1);
        let row = alert_queries::get_alert(&pool, 1).await.unwrap().unwrap();
        assert_eq!(row.fire_count, 2);
    }

    #[tokio::test]
    async fn test_fire_test_alert_mutates_nothing() {
        let pool = test_pool().await;
        let settings = SettingsService::new(pool.clone());
        let broadcaster = Arc::new(Broadcaster::new(50));

        alert_queries::create_alert(&pool, "AAPL", "price_above", 200.0, "default")
            .await
            .unwrap();

        let payload = fire_test_alert(&pool, &settings, &broadcaster, 1)
            .await
            .unwrap();
        assert_eq!(payload["severity"], "info");
        assert_eq!(payload["sound_type"], "chime");
        assert!(payload["current_price"].is_null());

        let row = alert_queries::get_alert(&pool, 1).await.unwrap().unwrap();
        assert!(row.triggered_at.is_none());
        assert_eq!(row.fire_count, 0);
        assert_eq!(row.notification_sent, 0);
    }

    #[tokio::test]
    async fn test_create_alert_validation() {
        let pool = test_pool().await;

        let bad_ticker = create_alert(
            &pool,
            CreateAlertRequest {
                ticker: "toolong".into(),
                condition_type: "price_above".into(),
                threshold: 100.0,
                sound_type: None,
            },
        )
        .await;
        assert!(matches!(bad_ticker, Err(AppError::Validation(_))));

        let bad_condition = create_alert(
            &pool,
            CreateAlertRequest {
                ticker: "AAPL".into(),
                condition_type: "price_equals".into(),
                threshold: 100.0,
                sound_type: None,
            },
        )
        .await;
        assert!(matches!(bad_condition, Err(AppError::Validation(_))));

        // pct_change thresholds above 100 are capped.
        let capped = create_alert(
            &pool,
            CreateAlertRequest {
                ticker: "AAPL".into(),
                condition_type: "pct_change".into(),
                threshold: 250.0,
                sound_type: Some("klaxon".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(capped.threshold, 100.0);
        assert_eq!(capped.sound_type, "default");
    }
}
