use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::external::provider::{DataProvider, ProviderError};
use crate::external::rate_tracker::{RateLimitSink, RateTracker};
use crate::models::market::{HistoryPeriod, PriceBar, PriceHistory, ProviderInfo, Quote, TickerResult};

/// Yahoo Finance — keyless default provider. The only provider with a true
/// batch quote endpoint, which is why price refresh prefers it.
pub struct YFinanceProvider {
    client: reqwest::Client,
    tracker: RateTracker,
    sink: RateLimitSink,
}

impl YFinanceProvider {
    pub fn new(sink: RateLimitSink) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .user_agent("Mozilla/5.0 (compatible; TickerPulse/3.0)")
                .build()
                .unwrap_or_default(),
            tracker: RateTracker::new("yfinance", 60),
            sink,
        }
    }

    async fn track(&self) {
        let status = self.tracker.track();
        self.sink.publish("yfinance", &status).await;
    }
}

// Minimal response structs (only what we need)
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "chartPreviousClose")]
    chart_previous_close: Option<f64>,
    #[serde(rename = "regularMarketVolume")]
    regular_market_volume: Option<i64>,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<OhlcvArrays>,
}

#[derive(Debug, Default, Deserialize)]
struct OhlcvArrays {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct SparkResponse {
    #[serde(rename = "spark")]
    spark: SparkBody,
}

#[derive(Debug, Deserialize)]
struct SparkBody {
    result: Option<Vec<SparkResult>>,
}

#[derive(Debug, Deserialize)]
struct SparkResult {
    symbol: String,
    response: Option<Vec<SparkSeries>>,
}

#[derive(Debug, Deserialize)]
struct SparkSeries {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<SearchQuote>,
}

#[derive(Debug, Deserialize)]
struct SearchQuote {
    symbol: Option<String>,
    #[serde(rename = "shortname")]
    short_name: Option<String>,
    #[serde(rename = "longname")]
    long_name: Option<String>,
    exchange: Option<String>,
    #[serde(rename = "quoteType")]
    quote_type: Option<String>,
}

fn quote_from_series(
    ticker: &str,
    timestamps: &[i64],
    arrays: &OhlcvArrays,
    now_fallback: i64,
) -> Option<Quote> {
    let closes: Vec<(usize, f64)> = arrays
        .close
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.map(|v| (i, v)))
        .collect();
    let (last_idx, current) = *closes.last()?;
    let previous = closes.len().checked_sub(2).map(|i| closes[i].1);

    let change = previous.map(|p| current - p).unwrap_or(0.0);
    let change_percent = previous
        .filter(|p| *p != 0.0)
        .map(|p| change / p * 100.0)
        .unwrap_or(0.0);

    Some(Quote {
        ticker: ticker.to_string(),
        price: current,
        open: arrays.open.get(last_idx).copied().flatten().unwrap_or(current),
        high: arrays.high.get(last_idx).copied().flatten().unwrap_or(current),
        low: arrays.low.get(last_idx).copied().flatten().unwrap_or(current),
        previous_close: previous,
        volume: arrays.volume.get(last_idx).copied().flatten().unwrap_or(0),
        timestamp: timestamps.get(last_idx).copied().unwrap_or(now_fallback),
        currency: "USD".to_string(),
        change,
        change_percent,
        source: "yfinance".to_string(),
    })
}

#[async_trait]
impl DataProvider for YFinanceProvider {
    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>, ProviderError> {
        self.track().await;

        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{ticker}?range=2d&interval=1d"
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: ChartResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let Some(result) = body.chart.result.and_then(|mut r| r.pop()) else {
            return Ok(None);
        };

        // Prefer the meta snapshot; fall back to the close series.
        if let Some(price) = result.meta.regular_market_price {
            let prev = result.meta.chart_previous_close;
            let change = prev.map(|p| price - p).unwrap_or(0.0);
            let change_percent = prev
                .filter(|p| *p != 0.0)
                .map(|p| change / p * 100.0)
                .unwrap_or(0.0);
            return Ok(Some(Quote {
                ticker: ticker.to_string(),
                price,
                open: price,
                high: price,
                low: price,
                previous_close: prev,
                volume: result.meta.regular_market_volume.unwrap_or(0),
                timestamp: result
                    .meta
                    .regular_market_time
                    .unwrap_or_else(|| chrono::Utc::now().timestamp()),
                currency: result.meta.currency.unwrap_or_else(|| "USD".to_string()),
                change,
                change_percent,
                source: "yfinance".to_string(),
            }));
        }

        let arrays = result.indicators.quote.first();
        Ok(arrays.and_then(|a| {
            quote_from_series(ticker, &result.timestamp, a, chrono::Utc::now().timestamp())
        }))
    }

    async fn get_quotes_batch(
        &self,
        tickers: &[String],
    ) -> Result<HashMap<String, Quote>, ProviderError> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }
        self.track().await;

        let url = format!(
            "https://query1.finance.yahoo.com/v7/finance/spark?symbols={}&range=2d&interval=1d",
            tickers.join(",")
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let body: SparkResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        let mut out = HashMap::new();
        for result in body.spark.result.unwrap_or_default() {
            let Some(series) = result.response.and_then(|mut r| r.pop()) else {
                continue; // partial success is acceptable
            };
            let Some(arrays) = series.indicators.quote.first() else {
                continue;
            };
            if let Some(quote) = quote_from_series(&result.symbol, &series.timestamp, arrays, now) {
                out.insert(result.symbol.clone(), quote);
            }
        }
        Ok(out)
    }

    async fn get_historical(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<Option<PriceHistory>, ProviderError> {
        self.track().await;

        let interval = match period {
            HistoryPeriod::OneDay => "5m",
            HistoryPeriod::FiveDays => "30m",
            _ => "1d",
        };
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{ticker}?range={}&interval={interval}",
            period.as_str()
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let body: ChartResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let Some(result) = body.chart.result.and_then(|mut r| r.pop()) else {
            return Ok(None);
        };
        let Some(arrays) = result.indicators.quote.first() else {
            return Ok(None);
        };

        let mut bars = Vec::new();
        for (i, ts) in result.timestamp.iter().enumerate() {
            let Some(close) = arrays.close.get(i).copied().flatten() else {
                continue; // skip missing closes
            };
            bars.push(PriceBar {
                timestamp: *ts,
                open: arrays.open.get(i).copied().flatten().unwrap_or(close),
                high: arrays.high.get(i).copied().flatten().unwrap_or(close),
                low: arrays.low.get(i).copied().flatten().unwrap_or(close),
                close,
                volume: arrays.volume.get(i).copied().flatten().unwrap_or(0),
            });
        }
        if bars.is_empty() {
            return Ok(None);
        }
        bars.sort_by_key(|b| b.timestamp);

        Ok(Some(PriceHistory {
            ticker: ticker.to_string(),
            bars,
            period,
            source: "yfinance".to_string(),
        }))
    }

    async fn search_ticker(&self, query: &str) -> Result<Vec<TickerResult>, ProviderError> {
        self.track().await;

        let url = "https://query1.finance.yahoo.com/v1/finance/search";
        let resp = self
            .client
            .get(url)
            .query(&[("q", query), ("quotesCount", "10"), ("newsCount", "0")])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let body: SearchResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(body
            .quotes
            .into_iter()
            .filter_map(|q| {
                let symbol = q.symbol?;
                Some(TickerResult {
                    name: q.short_name.or(q.long_name).unwrap_or_else(|| symbol.clone()),
                    ticker: symbol,
                    exchange: q.exchange.unwrap_or_default(),
                    kind: q.quote_type.unwrap_or_else(|| "stock".to_string()),
                    market: "US".to_string(),
                })
            })
            .collect())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "yfinance",
            display_name: "Yahoo Finance",
            tier: "free",
            requires_key: false,
            supported_markets: &["US", "IN"],
            has_realtime: false,
            rate_limit_per_minute: 60,
            description: "Keyless Yahoo Finance data with batch quote support",
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn rate_limit_status(&self) -> (i64, i64, Option<String>) {
        self.tracker.status()
    }
}
