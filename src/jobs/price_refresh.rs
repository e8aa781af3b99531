use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::db::{rating_queries, watchlist_queries};
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::models::market::PriceTick;
use crate::services::alert_service;
use crate::services::job_scheduler::JobContext;

pub async fn run_price_refresh(ctx: JobContext) {
    run_job(ctx, "price_refresh", "Price Refresh", price_refresh_body).await;
}

/// The hot path.
///
/// Batch-fetches live quotes for every active ticker, persists ONLY the
/// price columns of the ratings cache, pushes the fresh prices over both
/// realtime channels, and finally evaluates price alerts against exactly
/// the set of tickers that was just written — so alerts always see the same
/// prices clients see.
async fn price_refresh_body(ctx: JobContext) -> Result<JobOutcome, crate::errors::AppError> {
    // Manual mode: interval 0 in settings means the job is a no-op even if
    // a stale scheduler entry fires it.
    let interval = ctx
        .settings
        .price_refresh_interval(ctx.config.price_refresh_interval_seconds)
        .await;
    if interval == 0 {
        return Ok(JobOutcome::skipped("manual mode (interval=0)"));
    }

    let tickers = watchlist_queries::active_tickers(&ctx.pool).await?;
    if tickers.is_empty() {
        return Ok(JobOutcome::skipped("empty watchlist"));
    }

    info!("price_refresh: fetching prices for {} tickers", tickers.len());

    // One upstream call where the provider supports it; the registry tops up
    // stragglers with per-ticker fetches.
    let quotes = ctx.providers.get_quotes_batch(&tickers).await;
    if quotes.is_empty() {
        warn!("price_refresh: no price data returned for any ticker");
        return Ok(JobOutcome::success(format!(
            "no data for any of {} tickers",
            tickers.len()
        )));
    }

    let now_ts = Utc::now().timestamp();
    let prices: HashMap<String, PriceTick> = quotes
        .into_iter()
        .map(|(ticker, quote)| {
            let change = quote
                .previous_close
                .map(|prev| quote.price - prev)
                .unwrap_or(quote.change);
            let change_pct = quote
                .previous_close
                .filter(|prev| *prev != 0.0)
                .map(|prev| change / prev * 100.0)
                .unwrap_or(quote.change_percent);
            (
                ticker,
                PriceTick {
                    price: quote.price,
                    change,
                    change_pct,
                    volume: quote.volume,
                    ts: now_ts,
                },
            )
        })
        .collect();

    info!("price_refresh: fetched {}/{} tickers", prices.len(), tickers.len());

    // Persist BEFORE broadcasting so every consumer reads the same state.
    rating_queries::upsert_prices(&ctx.pool, &prices).await?;

    if ctx.config.ws_price_broadcast {
        let ws_count = ctx.broadcaster.broadcast_prices(&prices);
        if ws_count > 0 {
            info!("price_refresh: WS price_batch sent to {} clients", ws_count);
        }
    }

    let timestamp = Utc::now().to_rfc3339();
    for (ticker, tick) in &prices {
        ctx.broadcaster.send_event(
            "price_update",
            json!({
                "ticker": ticker,
                "price": tick.price,
                "change": tick.change,
                "change_pct": tick.change_pct,
                "volume": tick.volume,
                "timestamp": timestamp,
            }),
        );
    }

    let fresh: Vec<String> = prices.keys().cloned().collect();
    let fired =
        alert_service::evaluate_alerts(&ctx.pool, &ctx.settings, &ctx.broadcaster, &fresh).await?;

    Ok(JobOutcome::success(format!(
        "refreshed {}/{} tickers, {} alerts fired",
        prices.len(),
        tickers.len(),
        fired
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{alert_queries, job_queries, schema::init_all_tables};
    use crate::external::registry::test_support::FakeProvider;
    use crate::external::registry::ProviderRegistry;
    use crate::services::agent_service::AgentRegistry;
    use crate::services::broadcast::Broadcaster;
    use crate::services::latency_buffer::LatencyBuffer;
    use crate::services::settings_service::SettingsService;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::sync::Arc;

    async fn ctx_with_provider(provider: FakeProvider) -> JobContext {
        let pool: SqlitePool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();

        let mut registry = ProviderRegistry::new(None);
        registry.register("fake", Arc::new(provider));

        JobContext {
            pool: pool.clone(),
            config: Arc::new(crate::config::Config::from_env()),
            broadcaster: Arc::new(Broadcaster::new(50)),
            providers: Arc::new(registry),
            settings: Arc::new(SettingsService::new(pool.clone())),
            agents: Arc::new(AgentRegistry::empty(pool)),
            latency: Arc::new(LatencyBuffer::new()),
        }
    }

    async fn seed_watchlist(ctx: &JobContext) {
        for t in ["AAPL", "MSFT"] {
            watchlist_queries::add_stock(&ctx.pool, t, None, "US").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_happy_path_prices_persist_ai_columns_untouched() {
        let provider = FakeProvider::new("fake")
            .with_quote("AAPL", 205.0, 200.0)
            .with_quote("MSFT", 297.0, 300.0);
        let ctx = ctx_with_provider(provider).await;
        seed_watchlist(&ctx).await;

        // Pre-seed analysis values that the refresh must not touch.
        for t in ["AAPL", "MSFT"] {
            crate::db::rating_queries::upsert_analysis(
                &ctx.pool,
                &crate::models::rating::AnalysisUpdate {
                    ticker: t.into(),
                    rating: "HOLD".into(),
                    score: 50.0,
                    confidence: 40.0,
                    rsi: Some(48.0),
                    sentiment_score: None,
                    sentiment_label: None,
                    technical_score: Some(51.0),
                    fundamental_score: None,
                    summary: None,
                },
            )
            .await
            .unwrap();
        }

        let (_sse, mut rx) = ctx.broadcaster.register_sse();
        run_price_refresh(ctx.clone()).await;

        let aapl = rating_queries::get_rating(&ctx.pool, "AAPL").await.unwrap().unwrap();
        assert_eq!(aapl.current_price, Some(205.0));
        assert_eq!(aapl.price_change, Some(5.0));
        assert!((aapl.price_change_pct.unwrap() - 2.5).abs() < 1e-9);
        assert_eq!(aapl.rating, "HOLD");
        assert_eq!(aapl.score, 50.0);
        assert_eq!(aapl.rsi, Some(48.0));
        assert_eq!(aapl.technical_score, Some(51.0));

        let msft = rating_queries::get_rating(&ctx.pool, "MSFT").await.unwrap().unwrap();
        assert_eq!(msft.current_price, Some(297.0));
        assert!((msft.price_change_pct.unwrap() + 1.0).abs() < 1e-9);

        // Exactly one price_update per fresh ticker, then job_completed.
        let mut price_updates = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.event_type == "price_update" {
                price_updates.push(event.data["ticker"].as_str().unwrap().to_string());
            }
        }
        price_updates.sort();
        assert_eq!(price_updates, vec!["AAPL", "MSFT"]);

        let history = job_queries::get_job_history(&ctx.pool, Some("price_refresh"), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "success");
    }

    #[tokio::test]
    async fn test_manual_mode_skips() {
        let ctx = ctx_with_provider(FakeProvider::new("fake")).await;
        seed_watchlist(&ctx).await;
        ctx.settings.set("price_refresh_interval", "0").await.unwrap();

        run_price_refresh(ctx.clone()).await;

        let history = job_queries::get_job_history(&ctx.pool, Some("price_refresh"), 10)
            .await
            .unwrap();
        assert_eq!(history[0].status, "skipped");

        let rating = rating_queries::get_rating(&ctx.pool, "AAPL").await.unwrap();
        assert!(rating.is_none());
    }

    #[tokio::test]
    async fn test_alert_fires_from_refresh_pipeline() {
        let provider = FakeProvider::new("fake").with_quote("AAPL", 205.0, 200.0);
        let ctx = ctx_with_provider(provider).await;
        watchlist_queries::add_stock(&ctx.pool, "AAPL", None, "US").await.unwrap();

        alert_queries::create_alert(&ctx.pool, "AAPL", "price_above", 200.0, "default")
            .await
            .unwrap();

        let (_sse, mut rx) = ctx.broadcaster.register_sse();
        run_price_refresh(ctx.clone()).await;

        let mut saw_alert = false;
        while let Ok(event) = rx.try_recv() {
            if event.event_type == "alert" {
                saw_alert = true;
                assert_eq!(event.data["ticker"], "AAPL");
                assert_eq!(event.data["sound_type"], "chime");
            }
        }
        assert!(saw_alert);

        let alert = alert_queries::get_alert(&ctx.pool, 1).await.unwrap().unwrap();
        assert_eq!(alert.fire_count, 1);

        // Second run: fire-once holds.
        run_price_refresh(ctx.clone()).await;
        let alert = alert_queries::get_alert(&ctx.pool, 1).await.unwrap().unwrap();
        assert_eq!(alert.fire_count, 1);
    }
}
