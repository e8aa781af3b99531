use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::external::provider::{DataProvider, ProviderError};
use crate::external::rate_tracker::{RateLimitSink, RateTracker};
use crate::models::market::{HistoryPeriod, PriceBar, PriceHistory, ProviderInfo, Quote, TickerResult};

pub struct PolygonProvider {
    api_key: String,
    client: reqwest::Client,
    tracker: RateTracker,
    sink: RateLimitSink,
}

impl PolygonProvider {
    pub fn new(api_key: String, sink: RateLimitSink) -> Self {
        Self {
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            tracker: RateTracker::new("polygon", 5),
            sink,
        }
    }

    async fn track(&self) {
        let status = self.tracker.track();
        self.sink.publish("polygon", &status).await;
    }
}

#[derive(Debug, Deserialize)]
struct AggsResponse {
    #[serde(default)]
    results: Vec<AggBar>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
    /// Millisecond epoch.
    t: i64,
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(default)]
    results: Vec<TickerRef>,
}

#[derive(Debug, Deserialize)]
struct TickerRef {
    ticker: String,
    name: Option<String>,
    primary_exchange: Option<String>,
    market: Option<String>,
}

#[async_trait]
impl DataProvider for PolygonProvider {
    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>, ProviderError> {
        self.track().await;

        let url = format!("https://api.polygon.io/v2/aggs/ticker/{ticker}/prev");
        let resp = self
            .client
            .get(&url)
            .query(&[("adjusted", "true"), ("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let body: AggsResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let Some(bar) = body.results.first() else {
            return Ok(None);
        };
        let change = bar.c - bar.o;

        Ok(Some(Quote {
            ticker: ticker.to_string(),
            price: bar.c,
            open: bar.o,
            high: bar.h,
            low: bar.l,
            previous_close: Some(bar.o),
            volume: bar.v as i64,
            timestamp: bar.t / 1000,
            currency: "USD".to_string(),
            change,
            change_percent: if bar.o != 0.0 { change / bar.o * 100.0 } else { 0.0 },
            source: "polygon".to_string(),
        }))
    }

    async fn get_historical(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<Option<PriceHistory>, ProviderError> {
        self.track().await;

        let to = Utc::now().date_naive();
        let from = to - chrono::Duration::days(period.approx_days() as i64);
        let url = format!(
            "https://api.polygon.io/v2/aggs/ticker/{ticker}/range/1/day/{from}/{to}",
        );
        let resp = self
            .client
            .get(&url)
            .query(&[("adjusted", "true"), ("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let body: AggsResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        if body.results.is_empty() {
            return Ok(None);
        }

        let bars = body
            .results
            .iter()
            .map(|bar| PriceBar {
                timestamp: bar.t / 1000,
                open: bar.o,
                high: bar.h,
                low: bar.l,
                close: bar.c,
                volume: bar.v as i64,
            })
            .collect();

        Ok(Some(PriceHistory {
            ticker: ticker.to_string(),
            bars,
            period,
            source: "polygon".to_string(),
        }))
    }

    async fn search_ticker(&self, query: &str) -> Result<Vec<TickerResult>, ProviderError> {
        self.track().await;

        let resp = self
            .client
            .get("https://api.polygon.io/v3/reference/tickers")
            .query(&[
                ("search", query),
                ("active", "true"),
                ("limit", "10"),
                ("apiKey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let body: TickersResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(body
            .results
            .into_iter()
            .map(|r| TickerResult {
                name: r.name.unwrap_or_else(|| r.ticker.clone()),
                ticker: r.ticker,
                exchange: r.primary_exchange.unwrap_or_default(),
                kind: "stock".to_string(),
                market: r.market.unwrap_or_else(|| "US".to_string()),
            })
            .collect())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "polygon",
            display_name: "Polygon.io",
            tier: "freemium",
            requires_key: true,
            supported_markets: &["US"],
            has_realtime: true,
            rate_limit_per_minute: 5,
            description: "Polygon.io aggregates and reference data",
        }
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn rate_limit_status(&self) -> (i64, i64, Option<String>) {
        self.tracker.status()
    }
}
