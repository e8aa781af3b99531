use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::external::provider::{DataProvider, ProviderError};
use crate::external::rate_tracker::{RateLimitSink, RateTracker};
use crate::models::market::{HistoryPeriod, PriceBar, PriceHistory, ProviderInfo, Quote, TickerResult};

pub struct AlphaVantageProvider {
    api_key: String,
    client: reqwest::Client,
    tracker: RateTracker,
    sink: RateLimitSink,
}

impl AlphaVantageProvider {
    pub fn new(api_key: String, sink: RateLimitSink) -> Self {
        Self {
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            tracker: RateTracker::new("alpha_vantage", 5),
            sink,
        }
    }

    async fn track(&self) {
        let status = self.tracker.track();
        self.sink.publish("alpha_vantage", &status).await;
    }
}

fn parse_f64(s: Option<&String>) -> Option<f64> {
    s.and_then(|v| v.trim().trim_end_matches('%').parse().ok())
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote", default)]
    quote: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DailySeriesResponse {
    #[serde(rename = "Time Series (Daily)", default)]
    series: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "bestMatches", default)]
    matches: Vec<BTreeMap<String, String>>,
}

#[async_trait]
impl DataProvider for AlphaVantageProvider {
    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>, ProviderError> {
        self.track().await;

        let resp = self
            .client
            .get("https://www.alphavantage.co/query")
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", ticker),
                ("apikey", &self.api_key),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let body: GlobalQuoteResponse =
            resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let q = &body.quote;
        let Some(price) = parse_f64(q.get("05. price")) else {
            return Ok(None);
        };
        let prev = parse_f64(q.get("08. previous close"));
        let change = parse_f64(q.get("09. change")).unwrap_or(0.0);

        Ok(Some(Quote {
            ticker: ticker.to_string(),
            price,
            open: parse_f64(q.get("02. open")).unwrap_or(price),
            high: parse_f64(q.get("03. high")).unwrap_or(price),
            low: parse_f64(q.get("04. low")).unwrap_or(price),
            previous_close: prev,
            volume: q
                .get("06. volume")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            timestamp: Utc::now().timestamp(),
            currency: "USD".to_string(),
            change,
            change_percent: parse_f64(q.get("10. change percent")).unwrap_or(0.0),
            source: "alpha_vantage".to_string(),
        }))
    }

    async fn get_historical(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<Option<PriceHistory>, ProviderError> {
        self.track().await;

        let outputsize = if period.approx_days() > 100 { "full" } else { "compact" };
        let resp = self
            .client
            .get("https://www.alphavantage.co/query")
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", ticker),
                ("outputsize", outputsize),
                ("apikey", &self.api_key),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let body: DailySeriesResponse =
            resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        if body.series.is_empty() {
            return Ok(None);
        }

        let cutoff = Utc::now() - chrono::Duration::days(period.approx_days() as i64);
        let mut bars = Vec::new();
        for (date, fields) in &body.series {
            let Ok(day) = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
                continue;
            };
            let ts = day
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or(0);
            if ts < cutoff.timestamp() {
                continue;
            }
            let Some(close) = parse_f64(fields.get("4. close")) else {
                continue;
            };
            bars.push(PriceBar {
                timestamp: ts,
                open: parse_f64(fields.get("1. open")).unwrap_or(close),
                high: parse_f64(fields.get("2. high")).unwrap_or(close),
                low: parse_f64(fields.get("3. low")).unwrap_or(close),
                close,
                volume: fields
                    .get("5. volume")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
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
            source: "alpha_vantage".to_string(),
        }))
    }

    async fn search_ticker(&self, query: &str) -> Result<Vec<TickerResult>, ProviderError> {
        self.track().await;

        let resp = self
            .client
            .get("https://www.alphavantage.co/query")
            .query(&[
                ("function", "SYMBOL_SEARCH"),
                ("keywords", query),
                ("apikey", &self.api_key),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let body: SearchResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(body
            .matches
            .into_iter()
            .filter_map(|m| {
                Some(TickerResult {
                    ticker: m.get("1. symbol")?.clone(),
                    name: m.get("2. name").cloned().unwrap_or_default(),
                    exchange: m.get("4. region").cloned().unwrap_or_default(),
                    kind: m.get("3. type").cloned().unwrap_or_else(|| "stock".to_string()),
                    market: "US".to_string(),
                })
            })
            .collect())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "alpha_vantage",
            display_name: "Alpha Vantage",
            tier: "freemium",
            requires_key: true,
            supported_markets: &["US"],
            has_realtime: false,
            rate_limit_per_minute: 5,
            description: "Alpha Vantage daily series and delayed quotes",
        }
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn rate_limit_status(&self) -> (i64, i64, Option<String>) {
        self.tracker.status()
    }
}
