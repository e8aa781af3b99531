use crate::models::sentiment::{SentimentCacheRow, SignalCounts};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

// News score thresholds for signal classification.
pub const NEWS_BULLISH_MIN: f64 = 0.1;
pub const NEWS_BEARISH_MAX: f64 = -0.1;

pub async fn get_cache_row(
    pool: &SqlitePool,
    ticker: &str,
) -> Result<Option<SentimentCacheRow>, sqlx::Error> {
    sqlx::query_as::<_, SentimentCacheRow>("SELECT * FROM sentiment_cache WHERE ticker = ?")
        .bind(ticker)
        .fetch_optional(pool)
        .await
}

pub async fn upsert_cache_row(
    pool: &SqlitePool,
    ticker: &str,
    score: f64,
    label: &str,
    signal_count: i64,
    sources_json: &str,
    updated_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sentiment_cache (ticker, score, label, signal_count, sources, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(ticker) DO UPDATE SET \
           score = excluded.score, \
           label = excluded.label, \
           signal_count = excluded.signal_count, \
           sources = excluded.sources, \
           updated_at = excluded.updated_at",
    )
    .bind(ticker)
    .bind(score)
    .bind(label)
    .bind(signal_count)
    .bind(sources_json)
    .bind(updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_cache_row(pool: &SqlitePool, ticker: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sentiment_cache WHERE ticker = ?")
        .bind(ticker)
        .execute(pool)
        .await?;
    Ok(())
}

/// Classify news rows with a numeric sentiment score in the lookback window.
pub async fn news_signals(
    pool: &SqlitePool,
    ticker: &str,
    lookback_hours: i64,
) -> Result<SignalCounts, sqlx::Error> {
    let cutoff = (Utc::now() - Duration::hours(lookback_hours)).to_rfc3339();
    let rows: Vec<(f64,)> = sqlx::query_as(
        "SELECT sentiment_score FROM news \
         WHERE ticker = ? AND sentiment_score IS NOT NULL AND created_at >= ?",
    )
    .bind(ticker)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    let mut counts = SignalCounts::default();
    for (score,) in rows {
        if score > NEWS_BULLISH_MIN {
            counts.bullish += 1;
        } else if score < NEWS_BEARISH_MAX {
            counts.bearish += 1;
        } else {
            counts.neutral += 1;
        }
    }
    Ok(counts)
}

/// Bullish proportion of news signals inside [after, before), or None when
/// the window is empty.
pub async fn bullish_proportion(
    pool: &SqlitePool,
    ticker: &str,
    after: DateTime<Utc>,
    before: DateTime<Utc>,
) -> Result<Option<f64>, sqlx::Error> {
    let rows: Vec<(f64,)> = sqlx::query_as(
        "SELECT sentiment_score FROM news \
         WHERE ticker = ? AND sentiment_score IS NOT NULL \
           AND created_at >= ? AND created_at < ?",
    )
    .bind(ticker)
    .bind(after.to_rfc3339())
    .bind(before.to_rfc3339())
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }
    let bullish = rows.iter().filter(|(s,)| *s > NEWS_BULLISH_MIN).count();
    Ok(Some(bullish as f64 / rows.len() as f64))
}

/// Test/dev helper used by the sentiment tests to seed news rows.
pub async fn insert_news(
    pool: &SqlitePool,
    ticker: &str,
    title: &str,
    sentiment_score: f64,
    created_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO news (ticker, title, sentiment_score, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(ticker)
    .bind(title)
    .bind(sentiment_score)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}
