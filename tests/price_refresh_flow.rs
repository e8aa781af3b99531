//! End-to-end pipeline tests: batch fetch -> price-column persist ->
//! realtime broadcast -> alert evaluation, against an in-memory store and a
//! scripted data provider.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use tickerpulse_backend::config::Config;
use tickerpulse_backend::db::{alert_queries, job_queries, rating_queries, schema, watchlist_queries};
use tickerpulse_backend::external::registry::test_support::FakeProvider;
use tickerpulse_backend::external::registry::ProviderRegistry;
use tickerpulse_backend::jobs::price_refresh::run_price_refresh;
use tickerpulse_backend::models::rating::AnalysisUpdate;
use tickerpulse_backend::services::agent_service::AgentRegistry;
use tickerpulse_backend::services::broadcast::Broadcaster;
use tickerpulse_backend::services::job_scheduler::JobContext;
use tickerpulse_backend::services::latency_buffer::LatencyBuffer;
use tickerpulse_backend::services::settings_service::SettingsService;

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::init_all_tables(&pool).await.unwrap();
    pool
}

fn ctx_with(pool: SqlitePool, provider: FakeProvider) -> JobContext {
    let mut registry = ProviderRegistry::new(None);
    registry.register("fake", Arc::new(provider));
    JobContext {
        pool: pool.clone(),
        config: Arc::new(Config::from_env()),
        broadcaster: Arc::new(Broadcaster::new(50)),
        providers: Arc::new(registry),
        settings: Arc::new(SettingsService::new(pool.clone())),
        agents: Arc::new(AgentRegistry::empty(pool)),
        latency: Arc::new(LatencyBuffer::new()),
    }
}

#[tokio::test]
async fn price_refresh_happy_path() {
    let pool = memory_pool().await;

    // Seed: two active stocks with existing HOLD/50 analysis rows.
    for ticker in ["AAPL", "MSFT"] {
        watchlist_queries::add_stock(&pool, ticker, None, "US").await.unwrap();
        rating_queries::upsert_analysis(
            &pool,
            &AnalysisUpdate {
                ticker: ticker.into(),
                rating: "HOLD".into(),
                score: 50.0,
                confidence: 50.0,
                rsi: None,
                sentiment_score: None,
                sentiment_label: None,
                technical_score: None,
                fundamental_score: None,
                summary: None,
            },
        )
        .await
        .unwrap();
    }

    let provider = FakeProvider::new("fake")
        .with_quote("AAPL", 205.0, 200.0)
        .with_quote("MSFT", 297.0, 300.0);
    let ctx = ctx_with(pool.clone(), provider);
    let (_client, mut sse) = ctx.broadcaster.register_sse();

    run_price_refresh(ctx.clone()).await;

    // Prices landed with the right deltas.
    let aapl = rating_queries::get_rating(&pool, "AAPL").await.unwrap().unwrap();
    assert_eq!(aapl.current_price, Some(205.0));
    assert_eq!(aapl.price_change, Some(5.0));
    assert!((aapl.price_change_pct.unwrap() - 2.5).abs() < 1e-9);

    let msft = rating_queries::get_rating(&pool, "MSFT").await.unwrap().unwrap();
    assert_eq!(msft.current_price, Some(297.0));
    assert_eq!(msft.price_change, Some(-3.0));
    assert!((msft.price_change_pct.unwrap() + 1.0).abs() < 1e-9);

    // AI columns untouched.
    assert_eq!(aapl.rating, "HOLD");
    assert_eq!(aapl.score, 50.0);
    assert_eq!(msft.rating, "HOLD");
    assert_eq!(msft.score, 50.0);

    // Exactly one price_update per fresh ticker.
    let mut updates = Vec::new();
    while let Ok(event) = sse.try_recv() {
        if event.event_type == "price_update" {
            updates.push(event.data["ticker"].as_str().unwrap().to_string());
        }
    }
    updates.sort();
    assert_eq!(updates, vec!["AAPL", "MSFT"]);

    // One success row in job history.
    let history = job_queries::get_job_history(&pool, Some("price_refresh"), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "success");
}

#[tokio::test]
async fn alert_fires_exactly_once_through_refresh() {
    let pool = memory_pool().await;
    watchlist_queries::add_stock(&pool, "AAPL", None, "US").await.unwrap();

    let provider = FakeProvider::new("fake").with_quote("AAPL", 205.0, 200.0);
    let ctx = ctx_with(pool.clone(), provider);
    ctx.settings.set("alert_sound_type", "chime").await.unwrap();

    alert_queries::create_alert(&pool, "AAPL", "price_above", 200.0, "default")
        .await
        .unwrap();

    let (_client, mut sse) = ctx.broadcaster.register_sse();
    run_price_refresh(ctx.clone()).await;

    let alert = alert_queries::get_alert(&pool, 1).await.unwrap().unwrap();
    assert!(alert.triggered_at.is_some());
    assert_eq!(alert.fire_count, 1);
    assert_eq!(alert.notification_sent, 1);

    let mut alert_events = Vec::new();
    while let Ok(event) = sse.try_recv() {
        if event.event_type == "alert" {
            alert_events.push(event.data);
        }
    }
    assert_eq!(alert_events.len(), 1);
    let payload = &alert_events[0];
    assert_eq!(payload["sound_type"], "chime");
    assert_ne!(payload["sound_type"], "default");
    assert!(payload["message"].as_str().unwrap().starts_with("rose above $200.00"));
    assert_eq!(payload["severity"], "high");
    assert_eq!(payload["fire_count"], 1);

    // A second refresh at a higher price does not re-fire.
    let provider = FakeProvider::new("fake").with_quote("AAPL", 210.0, 200.0);
    let ctx2 = ctx_with(pool.clone(), provider);
    let (_client2, mut sse2) = ctx2.broadcaster.register_sse();
    run_price_refresh(ctx2).await;

    let alert = alert_queries::get_alert(&pool, 1).await.unwrap().unwrap();
    assert_eq!(alert.fire_count, 1);
    while let Ok(event) = sse2.try_recv() {
        assert_ne!(event.event_type, "alert");
    }
}

#[tokio::test]
async fn evaluation_only_covers_fresh_tickers() {
    let pool = memory_pool().await;
    // MSFT is active but the provider only answers for AAPL.
    watchlist_queries::add_stock(&pool, "AAPL", None, "US").await.unwrap();
    watchlist_queries::add_stock(&pool, "MSFT", None, "US").await.unwrap();

    // MSFT has a stale price that would satisfy the alert.
    let mut stale = std::collections::HashMap::new();
    stale.insert(
        "MSFT".to_string(),
        tickerpulse_backend::models::market::PriceTick {
            price: 500.0,
            change: 0.0,
            change_pct: 0.0,
            volume: 0,
            ts: 0,
        },
    );
    rating_queries::upsert_prices(&pool, &stale).await.unwrap();
    alert_queries::create_alert(&pool, "MSFT", "price_above", 400.0, "default")
        .await
        .unwrap();

    let provider = FakeProvider::new("fake").with_quote("AAPL", 100.0, 99.0);
    let ctx = ctx_with(pool.clone(), provider);
    run_price_refresh(ctx).await;

    // MSFT was not in the fresh set, so its alert must not fire.
    let alert = alert_queries::get_alert(&pool, 1).await.unwrap().unwrap();
    assert_eq!(alert.fire_count, 0);
    assert!(alert.triggered_at.is_none());
}
