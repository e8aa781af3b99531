use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::external::provider::{DataProvider, ProviderError};
use crate::external::rate_tracker::{RateLimitSink, RateTracker};
use crate::models::market::{HistoryPeriod, PriceBar, PriceHistory, ProviderInfo, Quote, TickerResult};

pub struct FinnhubProvider {
    api_key: String,
    client: reqwest::Client,
    tracker: RateTracker,
    sink: RateLimitSink,
}

impl FinnhubProvider {
    pub fn new(api_key: String, sink: RateLimitSink) -> Self {
        Self {
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            tracker: RateTracker::new("finnhub", 60),
            sink,
        }
    }

    async fn track(&self) {
        let status = self.tracker.track();
        self.sink.publish("finnhub", &status).await;
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    c: Option<f64>,  // current
    o: Option<f64>,  // open
    h: Option<f64>,  // high
    l: Option<f64>,  // low
    pc: Option<f64>, // previous close
    t: Option<i64>,  // timestamp
}

#[derive(Debug, Deserialize)]
struct FinnhubCandles {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct FinnhubSearch {
    #[serde(default)]
    result: Vec<FinnhubSearchItem>,
}

#[derive(Debug, Deserialize)]
struct FinnhubSearchItem {
    symbol: String,
    description: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[async_trait]
impl DataProvider for FinnhubProvider {
    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>, ProviderError> {
        self.track().await;

        let resp = self
            .client
            .get("https://finnhub.io/api/v1/quote")
            .query(&[("symbol", ticker), ("token", &self.api_key)])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let body: FinnhubQuote = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        // Finnhub reports price 0 for unknown symbols.
        let Some(price) = body.c.filter(|p| *p > 0.0) else {
            return Ok(None);
        };
        let prev = body.pc.filter(|p| *p > 0.0);
        let change = prev.map(|p| price - p).unwrap_or(0.0);

        Ok(Some(Quote {
            ticker: ticker.to_string(),
            price,
            open: body.o.unwrap_or(price),
            high: body.h.unwrap_or(price),
            low: body.l.unwrap_or(price),
            previous_close: prev,
            volume: 0,
            timestamp: body.t.unwrap_or_else(|| Utc::now().timestamp()),
            currency: "USD".to_string(),
            change,
            change_percent: prev.map(|p| change / p * 100.0).unwrap_or(0.0),
            source: "finnhub".to_string(),
        }))
    }

    async fn get_historical(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<Option<PriceHistory>, ProviderError> {
        self.track().await;

        let to = Utc::now().timestamp();
        let from = to - period.approx_days() as i64 * 86_400;
        let resp = self
            .client
            .get("https://finnhub.io/api/v1/stock/candle")
            .query(&[
                ("symbol", ticker),
                ("resolution", "D"),
                ("from", &from.to_string()),
                ("to", &to.to_string()),
                ("token", &self.api_key),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let body: FinnhubCandles = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        if body.s != "ok" || body.t.is_empty() {
            return Ok(None);
        }

        let bars = body
            .t
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                Some(PriceBar {
                    timestamp: *ts,
                    open: *body.o.get(i)?,
                    high: *body.h.get(i)?,
                    low: *body.l.get(i)?,
                    close: *body.c.get(i)?,
                    volume: body.v.get(i).map(|v| *v as i64).unwrap_or(0),
                })
            })
            .collect::<Vec<_>>();

        Ok(Some(PriceHistory {
            ticker: ticker.to_string(),
            bars,
            period,
            source: "finnhub".to_string(),
        }))
    }

    async fn search_ticker(&self, query: &str) -> Result<Vec<TickerResult>, ProviderError> {
        self.track().await;

        let resp = self
            .client
            .get("https://finnhub.io/api/v1/search")
            .query(&[("q", query), ("token", &self.api_key)])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let body: FinnhubSearch = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(body
            .result
            .into_iter()
            .map(|item| TickerResult {
                ticker: item.symbol,
                name: item.description,
                exchange: String::new(),
                kind: item.kind.unwrap_or_else(|| "stock".to_string()),
                market: "US".to_string(),
            })
            .collect())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "finnhub",
            display_name: "Finnhub",
            tier: "freemium",
            requires_key: true,
            supported_markets: &["US"],
            has_realtime: true,
            rate_limit_per_minute: 60,
            description: "Finnhub real-time quotes and candles",
        }
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn rate_limit_status(&self) -> (i64, i64, Option<String>) {
        self.tracker.status()
    }
}
