use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::models::market::{HistoryPeriod, PriceHistory, ProviderInfo, Quote, TickerResult};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("ticker not found")]
    NotFound,

    #[error("operation not supported by this provider")]
    NotSupported,
}

impl ProviderError {
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ProviderError::Network(e.to_string())
        } else if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::BadResponse(e.to_string())
        }
    }
}

/// A market-data source. `Ok(None)` means the provider answered but had no
/// data for the symbol; the registry treats that as a fallback trigger.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>, ProviderError>;

    async fn get_historical(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<Option<PriceHistory>, ProviderError>;

    async fn search_ticker(&self, query: &str) -> Result<Vec<TickerResult>, ProviderError>;

    fn info(&self) -> ProviderInfo;

    /// Whether the provider is configured (keyed providers need a key).
    fn is_available(&self) -> bool;

    /// (used, max, reset_at) from the provider's rolling request counter.
    fn rate_limit_status(&self) -> (i64, i64, Option<String>);

    /// Fetch quotes for many tickers in one upstream call. Providers without
    /// a batch endpoint report NotSupported and the caller falls back to
    /// per-ticker fetches.
    async fn get_quotes_batch(
        &self,
        _tickers: &[String],
    ) -> Result<HashMap<String, Quote>, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    /// Issue a tiny real request to prove the configuration works.
    async fn test_connection(&self) -> serde_json::Value {
        match self.get_quote("AAPL").await {
            Ok(Some(quote)) => json!({
                "success": true,
                "provider": self.info().name,
                "sample_price": quote.price,
            }),
            Ok(None) => json!({"success": false, "error": "No data returned for AAPL"}),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }
}
