use std::collections::HashMap;

use crate::models::market::PriceTick;
use crate::models::rating::{AiRating, AnalysisUpdate, MarketContext};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

const RATING_COLUMNS: &str = "id, ticker, rating, score, confidence, current_price, \
     price_change, price_change_pct, rsi, sentiment_score, sentiment_label, \
     technical_score, fundamental_score, summary, updated_at";

pub async fn get_rating(pool: &SqlitePool, ticker: &str) -> Result<Option<AiRating>, sqlx::Error> {
    sqlx::query_as::<_, AiRating>(&format!(
        "SELECT {RATING_COLUMNS} FROM ai_ratings WHERE ticker = ?"
    ))
    .bind(ticker)
    .fetch_optional(pool)
    .await
}

pub async fn list_ratings(pool: &SqlitePool) -> Result<Vec<AiRating>, sqlx::Error> {
    sqlx::query_as::<_, AiRating>(&format!(
        "SELECT {RATING_COLUMNS} FROM ai_ratings ORDER BY ticker ASC"
    ))
    .fetch_all(pool)
    .await
}

/// Batch-upsert live price fields for every ticker in one statement.
///
/// Writes ONLY current_price, price_change, price_change_pct, and updated_at
/// on conflict. Rating/score/confidence and the rest of the analysis columns
/// belong to `upsert_analysis` and are never touched here — the insert arm's
/// placeholder rating only applies to tickers with no existing row.
pub async fn upsert_prices(
    pool: &SqlitePool,
    prices: &HashMap<String, PriceTick>,
) -> Result<(), sqlx::Error> {
    if prices.is_empty() {
        return Ok(());
    }

    let now = Utc::now().to_rfc3339();
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO ai_ratings \
         (ticker, rating, score, confidence, current_price, price_change, price_change_pct, updated_at) ",
    );
    builder.push_values(prices.iter(), |mut b, (ticker, tick)| {
        b.push_bind(ticker)
            .push_bind("HOLD")
            .push_bind(0.0_f64)
            .push_bind(0.0_f64)
            .push_bind(tick.price)
            .push_bind(tick.change)
            .push_bind(tick.change_pct)
            .push_bind(&now);
    });
    builder.push(
        " ON CONFLICT(ticker) DO UPDATE SET \
           current_price = excluded.current_price, \
           price_change = excluded.price_change, \
           price_change_pct = excluded.price_change_pct, \
           updated_at = excluded.updated_at",
    );

    builder.build().execute(pool).await?;
    Ok(())
}

/// Upsert the analysis-derived columns. Price columns are never touched so a
/// concurrent price refresh cannot be clobbered.
pub async fn upsert_analysis(
    pool: &SqlitePool,
    update: &AnalysisUpdate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ai_ratings \
         (ticker, rating, score, confidence, rsi, sentiment_score, sentiment_label, \
          technical_score, fundamental_score, summary, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(ticker) DO UPDATE SET \
           rating = excluded.rating, \
           score = excluded.score, \
           confidence = excluded.confidence, \
           rsi = excluded.rsi, \
           sentiment_score = excluded.sentiment_score, \
           sentiment_label = excluded.sentiment_label, \
           technical_score = excluded.technical_score, \
           fundamental_score = excluded.fundamental_score, \
           summary = excluded.summary, \
           updated_at = excluded.updated_at",
    )
    .bind(&update.ticker)
    .bind(&update.rating)
    .bind(update.score)
    .bind(update.confidence)
    .bind(update.rsi)
    .bind(update.sentiment_score)
    .bind(&update.sentiment_label)
    .bind(update.technical_score)
    .bind(update.fundamental_score)
    .bind(&update.summary)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest cached market data for a ticker; neutral defaults when absent.
pub async fn market_context(pool: &SqlitePool, ticker: &str) -> MarketContext {
    let mut ctx = MarketContext::default();
    if let Ok(Some(rating)) = get_rating(pool, ticker).await {
        ctx.rsi = rating.rsi.unwrap_or(50.0);
        ctx.sentiment_score = rating.sentiment_score.unwrap_or(0.0);
        ctx.rating = rating.rating;
        ctx.price = rating.current_price.unwrap_or(0.0);
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_all_tables;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();
        pool
    }

    fn tick(price: f64, change: f64, change_pct: f64) -> PriceTick {
        PriceTick {
            price,
            change,
            change_pct,
            volume: 1000,
            ts: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_price_upsert_preserves_analysis_columns() {
        let pool = test_pool().await;

        upsert_analysis(
            &pool,
            &AnalysisUpdate {
                ticker: "AAPL".into(),
                rating: "BUY".into(),
                score: 82.0,
                confidence: 75.0,
                rsi: Some(61.2),
                sentiment_score: Some(0.4),
                sentiment_label: Some("bullish".into()),
                technical_score: Some(70.0),
                fundamental_score: Some(65.0),
                summary: Some("strong momentum".into()),
            },
        )
        .await
        .unwrap();

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), tick(205.0, 5.0, 2.5));
        upsert_prices(&pool, &prices).await.unwrap();

        let rating = get_rating(&pool, "AAPL").await.unwrap().unwrap();
        assert_eq!(rating.current_price, Some(205.0));
        assert_eq!(rating.price_change, Some(5.0));
        assert_eq!(rating.price_change_pct, Some(2.5));
        // Analysis columns untouched by the price write.
        assert_eq!(rating.rating, "BUY");
        assert_eq!(rating.score, 82.0);
        assert_eq!(rating.confidence, 75.0);
        assert_eq!(rating.rsi, Some(61.2));
        assert_eq!(rating.technical_score, Some(70.0));
    }

    #[tokio::test]
    async fn test_price_upsert_inserts_missing_ticker() {
        let pool = test_pool().await;

        let mut prices = HashMap::new();
        prices.insert("MSFT".to_string(), tick(297.0, -3.0, -1.0));
        upsert_prices(&pool, &prices).await.unwrap();

        let rating = get_rating(&pool, "MSFT").await.unwrap().unwrap();
        assert_eq!(rating.current_price, Some(297.0));
        assert_eq!(rating.rating, "HOLD");
    }

    #[tokio::test]
    async fn test_repeated_price_upsert_replaces_in_place() {
        let pool = test_pool().await;

        let mut prices = HashMap::new();
        prices.insert("NVDA".to_string(), tick(500.0, 1.0, 0.2));
        upsert_prices(&pool, &prices).await.unwrap();
        prices.insert("NVDA".to_string(), tick(510.0, 10.0, 2.0));
        upsert_prices(&pool, &prices).await.unwrap();

        let rows: Vec<AiRating> = list_ratings(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].current_price, Some(510.0));
    }
}
