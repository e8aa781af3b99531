use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::{agent_queries, sentiment_queries};
use crate::models::sentiment::{SentimentView, SignalCounts};

pub const CACHE_TTL_SECONDS: i64 = 900; // 15 minutes

const NEWS_LOOKBACK_HOURS: i64 = 24;
const REDDIT_LOOKBACK_HOURS: i64 = 6;
const REDDIT_RUN_LIMIT: i64 = 10;

const BULLISH_THRESHOLD: f64 = 0.6;
const BEARISH_THRESHOLD: f64 = 0.4;

const STOCKTWITS_MESSAGES_LIMIT: u32 = 30;
const STOCKTWITS_TIMEOUT_SECONDS: u64 = 3;

const TREND_WINDOW_HOURS: i64 = 12;
const TREND_THRESHOLD: f64 = 0.05;

fn score_to_label(score: f64) -> &'static str {
    if score >= BULLISH_THRESHOLD {
        "bullish"
    } else if score <= BEARISH_THRESHOLD {
        "bearish"
    } else {
        "neutral"
    }
}

// ==============================================================================
// Reddit signals (investigator agent runs)
// ==============================================================================

#[derive(Debug, Deserialize)]
struct TrendingItem {
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    sentiment: String,
    #[serde(default)]
    mentions: Option<i64>,
}

fn parse_reddit_output(output: &str, ticker_upper: &str, counts: &mut SignalCounts) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(output) else {
        return;
    };
    // Either a bare list of trending items or a {"trending": [...]} wrapper.
    let items = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => match map.get("trending") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => return,
        },
        _ => return,
    };

    for item in items {
        let Ok(item) = serde_json::from_value::<TrendingItem>(item) else {
            continue;
        };
        if item.ticker.to_uppercase() != ticker_upper {
            continue;
        }
        // Weight by mention count when available.
        let weight = item.mentions.unwrap_or(1).max(1);
        match item.sentiment.to_lowercase().as_str() {
            "bullish" => counts.bullish += weight,
            "bearish" => counts.bearish += weight,
            _ => counts.neutral += weight,
        }
    }
}

async fn reddit_signals(pool: &SqlitePool, ticker: &str) -> SignalCounts {
    let mut counts = SignalCounts::default();
    let outputs =
        match agent_queries::recent_investigator_outputs(pool, REDDIT_LOOKBACK_HOURS, REDDIT_RUN_LIMIT)
            .await
        {
            Ok(outputs) => outputs,
            Err(e) => {
                debug!("reddit agent_runs query failed for {}: {}", ticker, e);
                return counts;
            }
        };

    let ticker_upper = ticker.to_uppercase();
    for output in outputs {
        parse_reddit_output(&output, &ticker_upper, &mut counts);
    }
    counts
}

// ==============================================================================
// StockTwits (live, never cached)
// ==============================================================================

#[derive(Debug, Deserialize)]
struct StocktwitsResponse {
    #[serde(default)]
    messages: Vec<StocktwitsMessage>,
}

#[derive(Debug, Deserialize)]
struct StocktwitsMessage {
    entities: Option<StocktwitsEntities>,
}

#[derive(Debug, Deserialize)]
struct StocktwitsEntities {
    sentiment: Option<StocktwitsSentiment>,
}

#[derive(Debug, Deserialize)]
struct StocktwitsSentiment {
    basic: Option<String>,
}

/// Live StockTwits counts. A StockTwits outage degrades silently to zero
/// counts so it can never break the sentiment endpoint.
async fn stocktwits_signals(ticker: &str) -> SignalCounts {
    let mut counts = SignalCounts::default();
    let url = format!(
        "https://api.stocktwits.com/api/2/streams/symbol/{}.json",
        ticker.to_uppercase()
    );

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(STOCKTWITS_TIMEOUT_SECONDS))
        .build()
    {
        Ok(c) => c,
        Err(_) => return counts,
    };

    let body = match client
        .get(&url)
        .query(&[("limit", STOCKTWITS_MESSAGES_LIMIT)])
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        Ok(resp) => match resp.json::<StocktwitsResponse>().await {
            Ok(body) => body,
            Err(e) => {
                debug!("stocktwits parse failed for {}: {}", ticker, e);
                return counts;
            }
        },
        Err(e) => {
            debug!("stocktwits fetch failed for {}: {}", ticker, e);
            return counts;
        }
    };

    for msg in body.messages {
        match msg
            .entities
            .and_then(|e| e.sentiment)
            .and_then(|s| s.basic)
            .map(|b| b.to_lowercase())
            .as_deref()
        {
            Some("bullish") => counts.bullish += 1,
            Some("bearish") => counts.bearish += 1,
            _ => counts.neutral += 1,
        }
    }
    counts
}

// ==============================================================================
// Trend
// ==============================================================================

/// 24h directional change from two consecutive 12h news windows.
async fn compute_trend(pool: &SqlitePool, ticker: &str) -> &'static str {
    let now = Utc::now();
    let mid = now - Duration::hours(TREND_WINDOW_HOURS);
    let early = now - Duration::hours(TREND_WINDOW_HOURS * 2);

    let recent = sentiment_queries::bullish_proportion(pool, ticker, mid, now)
        .await
        .unwrap_or(None);
    let older = sentiment_queries::bullish_proportion(pool, ticker, early, mid)
        .await
        .unwrap_or(None);

    match (recent, older) {
        (Some(recent), Some(older)) => {
            let delta = recent - older;
            if delta >= TREND_THRESHOLD {
                "up"
            } else if delta <= -TREND_THRESHOLD {
                "down"
            } else {
                "flat"
            }
        }
        _ => "flat",
    }
}

// ==============================================================================
// Aggregation + cache
// ==============================================================================

struct Computed {
    score: Option<f64>,
    label: String,
    signal_count: i64,
    news_total: i64,
    reddit_total: i64,
}

async fn compute_sentiment(pool: &SqlitePool, ticker: &str) -> Computed {
    let news = sentiment_queries::news_signals(pool, ticker, NEWS_LOOKBACK_HOURS)
        .await
        .unwrap_or_default();
    let reddit = reddit_signals(pool, ticker).await;

    let total = news.total() + reddit.total();
    if total == 0 {
        return Computed {
            score: None,
            label: "neutral".to_string(),
            signal_count: 0,
            news_total: 0,
            reddit_total: 0,
        };
    }

    let bullish = news.bullish + reddit.bullish;
    let score = ((bullish as f64 / total as f64) * 10_000.0).round() / 10_000.0;
    Computed {
        score: Some(score),
        label: score_to_label(score).to_string(),
        signal_count: total,
        news_total: news.total(),
        reddit_total: reddit.total(),
    }
}

/// Evict a ticker from the cache. A pure cache delete: this never
/// re-broadcasts, which is what keeps the SSE news path from cycling back
/// into itself.
pub async fn invalidate_ticker(pool: &SqlitePool, ticker: &str) {
    let ticker = ticker.to_uppercase();
    if let Err(e) = sentiment_queries::delete_cache_row(pool, &ticker).await {
        warn!("sentiment cache invalidation failed for {}: {}", ticker, e);
    }
}

/// Cached or freshly-computed sentiment for a ticker.
///
/// News + Reddit counts are cached for 15 minutes; StockTwits is always
/// fetched live and merged after the DB read. Concurrent recomputes are
/// last-writer-wins on the cache row, which is acceptable because every
/// writer derives from the same source tables.
pub async fn get_sentiment(pool: &SqlitePool, ticker: &str) -> SentimentView {
    let ticker = ticker.to_uppercase();
    let now = Utc::now();
    let cutoff = (now - Duration::seconds(CACHE_TTL_SECONDS)).to_rfc3339();

    // Cache hit path.
    if let Ok(Some(row)) = sentiment_queries::get_cache_row(pool, &ticker).await {
        if row.updated_at >= cutoff {
            // A corrupt sources blob degrades to an empty object rather
            // than failing the request.
            let mut sources = serde_json::from_str::<serde_json::Value>(&row.sources)
                .ok()
                .filter(|v| v.is_object())
                .unwrap_or_else(|| json!({}));
            let st = stocktwits_signals(&ticker).await;
            sources["stocktwits"] = json!(st.total());
            return SentimentView {
                ticker: ticker.clone(),
                score: Some(row.score),
                label: row.label,
                signal_count: row.signal_count,
                sources,
                updated_at: row.updated_at,
                stale: false,
                trend: compute_trend(pool, &ticker).await.to_string(),
            };
        }
    }

    // Recompute path.
    let computed = compute_sentiment(pool, &ticker).await;
    let updated_at = now.to_rfc3339();
    let mut sources = json!({
        "news": computed.news_total,
        "reddit": computed.reddit_total,
    });

    // Only cache when there are actual signals (score column is NOT NULL).
    if computed.signal_count > 0 {
        if let Err(e) = sentiment_queries::upsert_cache_row(
            pool,
            &ticker,
            computed.score.unwrap_or(0.0),
            &computed.label,
            computed.signal_count,
            &sources.to_string(),
            &updated_at,
        )
        .await
        {
            warn!("sentiment cache write failed for {}: {}", ticker, e);
        }
    }

    // StockTwits merged after the DB write; no connection held over HTTP.
    let st = stocktwits_signals(&ticker).await;
    sources["stocktwits"] = json!(st.total());

    SentimentView {
        ticker: ticker.clone(),
        score: computed.score,
        label: computed.label,
        signal_count: computed.signal_count,
        sources,
        updated_at,
        stale: false,
        trend: compute_trend(pool, &ticker).await.to_string(),
    }
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

    #[test]
    fn test_score_labels() {
        assert_eq!(score_to_label(0.8), "bullish");
        assert_eq!(score_to_label(0.6), "bullish");
        assert_eq!(score_to_label(0.5), "neutral");
        assert_eq!(score_to_label(0.4), "bearish");
        assert_eq!(score_to_label(0.1), "bearish");
    }

    #[test]
    fn test_reddit_output_parsing_weights_mentions() {
        let mut counts = SignalCounts::default();
        let output = json!([
            {"ticker": "AAPL", "sentiment": "bullish", "mentions": 5},
            {"ticker": "aapl", "sentiment": "bearish"},
            {"ticker": "MSFT", "sentiment": "bullish", "mentions": 99}
        ])
        .to_string();
        parse_reddit_output(&output, "AAPL", &mut counts);
        assert_eq!(counts.bullish, 5);
        assert_eq!(counts.bearish, 1);
        assert_eq!(counts.neutral, 0);
    }

    #[test]
    fn test_reddit_output_parsing_wrapper_shape() {
        let mut counts = SignalCounts::default();
        let output = json!({"trending": [
            {"ticker": "NVDA", "sentiment": "unknown", "mentions": 3}
        ]})
        .to_string();
        parse_reddit_output(&output, "NVDA", &mut counts);
        assert_eq!(counts.neutral, 3);

        // Garbage output is ignored.
        parse_reddit_output("not json at all", "NVDA", &mut counts);
        assert_eq!(counts.total(), 3);
    }

    #[tokio::test]
    async fn test_news_signal_classification() {
        let pool = test_pool().await;
        let now = Utc::now().to_rfc3339();
        sentiment_queries::insert_news(&pool, "AAPL", "good", 0.5, &now)
            .await
            .unwrap();
        sentiment_queries::insert_news(&pool, "AAPL", "bad", -0.5, &now)
            .await
            .unwrap();
        sentiment_queries::insert_news(&pool, "AAPL", "meh", 0.05, &now)
            .await
            .unwrap();

        let counts = sentiment_queries::news_signals(&pool, "AAPL", 24)
            .await
            .unwrap();
        assert_eq!(counts.bullish, 1);
        assert_eq!(counts.bearish, 1);
        assert_eq!(counts.neutral, 1);
    }

    #[tokio::test]
    async fn test_empty_sources_yield_neutral_uncached() {
        let pool = test_pool().await;
        let computed = compute_sentiment(&pool, "ZZZZ").await;
        assert_eq!(computed.score, None);
        assert_eq!(computed.label, "neutral");
        assert_eq!(computed.signal_count, 0);
    }

    #[tokio::test]
    async fn test_invalidate_clears_cache_row() {
        let pool = test_pool().await;
        sentiment_queries::upsert_cache_row(
            &pool,
            "AAPL",
            0.7,
            "bullish",
            10,
            "{}",
            &Utc::now().to_rfc3339(),
        )
        .await
        .unwrap();

        invalidate_ticker(&pool, "aapl").await;
        let row = sentiment_queries::get_cache_row(&pool, "AAPL").await.unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_trend_up_when_recent_window_more_bullish() {
        let pool = test_pool().await;
        let recent = (Utc::now() - Duration::hours(2)).to_rfc3339();
        let older = (Utc::now() - Duration::hours(18)).to_rfc3339();

        // Older window: bearish. Recent window: bullish.
        for _ in 0..4 {
            sentiment_queries::insert_news(&pool, "AAPL", "old bad", -0.5, &older)
                .await
                .unwrap();
            sentiment_queries::insert_news(&pool, "AAPL", "new good", 0.5, &recent)
                .await
                .unwrap();
        }

        assert_eq!(compute_trend(&pool, "AAPL").await, "up");
    }

    #[tokio::test]
    async fn test_trend_flat_without_both_windows() {
        let pool = test_pool().await;
        assert_eq!(compute_trend(&pool, "AAPL").await, "flat");
    }
}
