use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::external::alphavantage::AlphaVantageProvider;
use crate::external::finnhub::FinnhubProvider;
use crate::external::polygon::PolygonProvider;
use crate::external::provider::{DataProvider, ProviderError};
use crate::external::rate_tracker::RateLimitSink;
use crate::external::yfinance::YFinanceProvider;
use crate::models::market::{HistoryPeriod, PriceHistory, Quote, TickerResult};
use crate::services::broadcast::Broadcaster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    NoData,
    Exception,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::NoData => "no_data",
            FallbackReason::Exception => "exception",
        }
    }
}

pub type FallbackCallback = Box<dyn Fn(&str, &str, FallbackReason) + Send + Sync>;

/// Ordered fallback chain of data providers.
///
/// Walks the chain on each request: unavailable providers are skipped
/// silently, and the first provider returning a non-empty result wins. When
/// an earlier provider was tried and failed, the fallback callback fires
/// exactly once per request with the first failure's reason.
pub struct ProviderRegistry {
    providers: Vec<(&'static str, Arc<dyn DataProvider>)>,
    primary: RwLock<Option<String>>,
    on_fallback: Option<FallbackCallback>,
}

impl ProviderRegistry {
    pub fn new(on_fallback: Option<FallbackCallback>) -> Self {
        Self {
            providers: Vec::new(),
            primary: RwLock::new(None),
            on_fallback,
        }
    }

    /// Wire up the default chain from configuration. YFinance goes first —
    /// it is keyless and carries the batch endpoint price refresh needs.
    pub fn from_config(config: &Config, sink: RateLimitSink, broadcaster: Arc<Broadcaster>) -> Self {
        let cb: FallbackCallback = Box::new(move |from, to, reason| {
            broadcaster.send_event(
                "provider_fallback",
                json!({
                    "from": from,
                    "to": to,
                    "reason": reason.as_str(),
                }),
            );
        });

        let mut registry = Self::new(Some(cb));
        registry.register("yfinance", Arc::new(YFinanceProvider::new(sink.clone())));
        registry.register(
            "finnhub",
            Arc::new(FinnhubProvider::new(config.finnhub_api_key.clone(), sink.clone())),
        );
        registry.register(
            "alpha_vantage",
            Arc::new(AlphaVantageProvider::new(
                config.alpha_vantage_key.clone(),
                sink.clone(),
            )),
        );
        registry.register(
            "polygon",
            Arc::new(PolygonProvider::new(config.polygon_api_key.clone(), sink)),
        );
        registry
    }

    pub fn register(&mut self, name: &'static str, provider: Arc<dyn DataProvider>) {
        if !self.providers.iter().any(|(n, _)| *n == name) {
            self.providers.push((name, provider));
        }
    }

    pub fn set_primary(&self, name: &str) -> bool {
        if self.providers.iter().any(|(n, _)| *n == name) {
            *self.primary.write() = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn DataProvider>> {
        self.providers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| p.clone())
    }

    /// Walk order: primary override first (when set), then registration order.
    fn chain(&self) -> Vec<(&'static str, Arc<dyn DataProvider>)> {
        let primary = self.primary.read().clone();
        let mut out = Vec::with_capacity(self.providers.len());
        if let Some(primary) = &primary {
            if let Some(entry) = self.providers.iter().find(|(n, _)| n == primary) {
                out.push(entry.clone());
            }
        }
        for entry in &self.providers {
            if Some(entry.0) != primary.as_deref() {
                out.push(entry.clone());
            }
        }
        out
    }

    fn notify_fallback(&self, from: &str, to: &str, reason: FallbackReason) {
        if let Some(cb) = &self.on_fallback {
            cb(from, to, reason);
        }
    }

    pub async fn get_quote(&self, ticker: &str) -> Option<Quote> {
        let mut first_failure: Option<(&'static str, FallbackReason)> = None;

        for (name, provider) in self.chain() {
            if !provider.is_available() {
                continue;
            }
            match provider.get_quote(ticker).await {
                Ok(Some(quote)) => {
                    if let Some((from, reason)) = first_failure {
                        self.notify_fallback(from, name, reason);
                    }
                    return Some(quote);
                }
                Ok(None) => {
                    first_failure.get_or_insert((name, FallbackReason::NoData));
                }
                Err(e) => {
                    warn!("provider {} failed for {}: {}", name, ticker, e);
                    first_failure.get_or_insert((name, FallbackReason::Exception));
                }
            }
        }
        None
    }

    pub async fn get_historical(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Option<PriceHistory> {
        let mut first_failure: Option<(&'static str, FallbackReason)> = None;

        for (name, provider) in self.chain() {
            if !provider.is_available() {
                continue;
            }
            match provider.get_historical(ticker, period).await {
                Ok(Some(history)) if !history.bars.is_empty() => {
                    if let Some((from, reason)) = first_failure {
                        self.notify_fallback(from, name, reason);
                    }
                    return Some(history);
                }
                Ok(_) => {
                    first_failure.get_or_insert((name, FallbackReason::NoData));
                }
                Err(e) => {
                    warn!("provider {} failed historical for {}: {}", name, ticker, e);
                    first_failure.get_or_insert((name, FallbackReason::Exception));
                }
            }
        }
        None
    }

    pub async fn search_ticker(&self, query: &str) -> Vec<TickerResult> {
        for (name, provider) in self.chain() {
            if !provider.is_available() {
                continue;
            }
            match provider.search_ticker(query).await {
                Ok(results) if !results.is_empty() => return results,
                Ok(_) => continue,
                Err(e) => {
                    warn!("provider {} search failed for {:?}: {}", name, query, e);
                    continue;
                }
            }
        }
        Vec::new()
    }

    /// Batch quotes: try the first chain provider with a batch endpoint,
    /// then top up anything missing with per-ticker fetches in parallel.
    pub async fn get_quotes_batch(&self, tickers: &[String]) -> HashMap<String, Quote> {
        let mut out = HashMap::new();

        for (name, provider) in self.chain() {
            if !provider.is_available() {
                continue;
            }
            match provider.get_quotes_batch(tickers).await {
                Ok(batch) => {
                    out = batch;
                    break;
                }
                Err(ProviderError::NotSupported) => continue,
                Err(e) => {
                    warn!("batch quote call failed on {}: {}", name, e);
                    break;
                }
            }
        }

        let missing: Vec<&String> = tickers.iter().filter(|t| !out.contains_key(*t)).collect();
        if !missing.is_empty() {
            let fetches = missing.iter().map(|ticker| async move {
                ((*ticker).clone(), self.get_quote(ticker).await)
            });
            for (ticker, quote) in join_all(fetches).await {
                if let Some(quote) = quote {
                    out.insert(ticker, quote);
                }
            }
        }
        out
    }

    pub fn list_providers(&self) -> Vec<serde_json::Value> {
        let primary = self.primary.read().clone();
        self.providers
            .iter()
            .map(|(name, provider)| {
                let info = provider.info();
                let (used, max, reset_at) = provider.rate_limit_status();
                json!({
                    "name": info.name,
                    "display_name": info.display_name,
                    "tier": info.tier,
                    "is_available": provider.is_available(),
                    "is_primary": Some(name.to_string()) == primary,
                    "has_realtime": info.has_realtime,
                    "supported_markets": info.supported_markets,
                    "rate_limit_per_minute": info.rate_limit_per_minute,
                    "rate_limit_used": used,
                    "rate_limit_max": max,
                    "reset_at": reset_at,
                    "description": info.description,
                })
            })
            .collect()
    }
}

/// Scriptable provider used by the unit and integration test suites.
pub mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable provider for registry and job tests.
    pub struct FakeProvider {
        pub name: &'static str,
        pub quotes: HashMap<String, Quote>,
        pub available: bool,
        pub fail_with_error: bool,
        pub batch_supported: bool,
        pub calls: AtomicUsize,
    }

    impl FakeProvider {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                quotes: HashMap::new(),
                available: true,
                fail_with_error: false,
                batch_supported: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_quote(mut self, ticker: &str, price: f64, previous_close: f64) -> Self {
            self.quotes.insert(
                ticker.to_string(),
                Quote {
                    ticker: ticker.to_string(),
                    price,
                    open: price,
                    high: price,
                    low: price,
                    previous_close: Some(previous_close),
                    volume: 1000,
                    timestamp: 1_700_000_000,
                    currency: "USD".to_string(),
                    change: price - previous_close,
                    change_percent: (price - previous_close) / previous_close * 100.0,
                    source: self.name.to_string(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl DataProvider for FakeProvider {
        async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_error {
                return Err(ProviderError::Network("fake outage".to_string()));
            }
            Ok(self.quotes.get(ticker).cloned())
        }

        async fn get_quotes_batch(
            &self,
            tickers: &[String],
        ) -> Result<HashMap<String, Quote>, ProviderError> {
            if !self.batch_supported {
                return Err(ProviderError::NotSupported);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_error {
                return Err(ProviderError::Network("fake outage".to_string()));
            }
            Ok(tickers
                .iter()
                .filter_map(|t| self.quotes.get(t).map(|q| (t.clone(), q.clone())))
                .collect())
        }

        async fn get_historical(
            &self,
            _ticker: &str,
            _period: HistoryPeriod,
        ) -> Result<Option<PriceHistory>, ProviderError> {
            Ok(None)
        }

        async fn search_ticker(&self, _query: &str) -> Result<Vec<TickerResult>, ProviderError> {
            Ok(Vec::new())
        }

        fn info(&self) -> crate::models::market::ProviderInfo {
            crate::models::market::ProviderInfo {
                name: self.name,
                display_name: self.name,
                tier: "free",
                requires_key: false,
                supported_markets: &["US"],
                has_realtime: false,
                rate_limit_per_minute: 60,
                description: "fake",
            }
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn rate_limit_status(&self) -> (i64, i64, Option<String>) {
            (0, 60, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeProvider;
    use super::*;
    use parking_lot::Mutex;

    fn collecting_callback() -> (FallbackCallback, Arc<Mutex<Vec<(String, String, &'static str)>>>)
    {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let cb: FallbackCallback = Box::new(move |from, to, reason| {
            events_clone
                .lock()
                .push((from.to_string(), to.to_string(), reason.as_str()));
        });
        (cb, events)
    }

    #[tokio::test]
    async fn test_first_provider_wins_no_fallback_event() {
        let (cb, events) = collecting_callback();
        let mut registry = ProviderRegistry::new(Some(cb));
        registry.register(
            "one",
            Arc::new(FakeProvider::new("one").with_quote("AAPL", 205.0, 200.0)),
        );
        registry.register(
            "two",
            Arc::new(FakeProvider::new("two").with_quote("AAPL", 999.0, 999.0)),
        );

        let quote = registry.get_quote("AAPL").await.unwrap();
        assert_eq!(quote.price, 205.0);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_event_fires_once_with_first_reason() {
        let (cb, events) = collecting_callback();
        let mut registry = ProviderRegistry::new(Some(cb));

        let mut failing = FakeProvider::new("one");
        failing.fail_with_error = true;
        registry.register("one", Arc::new(failing));
        registry.register("two", Arc::new(FakeProvider::new("two"))); // no data
        registry.register(
            "three",
            Arc::new(FakeProvider::new("three").with_quote("AAPL", 205.0, 200.0)),
        );

        let quote = registry.get_quote("AAPL").await.unwrap();
        assert_eq!(quote.source, "three");

        let recorded = events.lock().clone();
        assert_eq!(
            recorded,
            vec![("one".to_string(), "three".to_string(), "exception")]
        );
    }

    #[tokio::test]
    async fn test_unavailable_provider_skipped_silently() {
        let (cb, events) = collecting_callback();
        let mut registry = ProviderRegistry::new(Some(cb));

        let mut keyless = FakeProvider::new("keyed");
        keyless.available = false;
        registry.register("keyed", Arc::new(keyless));
        registry.register(
            "open",
            Arc::new(FakeProvider::new("open").with_quote("AAPL", 205.0, 200.0)),
        );

        let quote = registry.get_quote("AAPL").await.unwrap();
        assert_eq!(quote.source, "open");
        // Skipping for unavailability is not a fallback.
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_primary_override_reorders_chain() {
        let mut registry = ProviderRegistry::new(None);
        registry.register(
            "one",
            Arc::new(FakeProvider::new("one").with_quote("AAPL", 100.0, 99.0)),
        );
        registry.register(
            "two",
            Arc::new(FakeProvider::new("two").with_quote("AAPL", 200.0, 199.0)),
        );

        assert!(registry.set_primary("two"));
        let quote = registry.get_quote("AAPL").await.unwrap();
        assert_eq!(quote.source, "two");

        assert!(!registry.set_primary("nonexistent"));
    }

    #[tokio::test]
    async fn test_batch_tops_up_missing_tickers() {
        let mut registry = ProviderRegistry::new(None);

        let mut batcher = FakeProvider::new("batcher").with_quote("AAPL", 205.0, 200.0);
        batcher.batch_supported = true;
        registry.register("batcher", Arc::new(batcher));
        registry.register(
            "single",
            Arc::new(FakeProvider::new("single").with_quote("MSFT", 297.0, 300.0)),
        );

        let quotes = registry
            .get_quotes_batch(&["AAPL".to_string(), "MSFT".to_string()])
            .await;
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes["AAPL"].source, "batcher");
        assert_eq!(quotes["MSFT"].source, "single");
    }
}
