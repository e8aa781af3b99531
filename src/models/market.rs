use serde::{Deserialize, Serialize};

// ==============================================================================
// Data provider types
// ==============================================================================

/// Real-time or delayed quote snapshot, normalised to UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: Option<f64>,
    pub volume: i64,
    pub timestamp: i64,
    pub currency: String,
    pub change: f64,
    pub change_percent: f64,
    pub source: String,
}

/// Single OHLCV bar (unix seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistory {
    pub ticker: String,
    pub bars: Vec<PriceBar>,
    pub period: HistoryPeriod,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerResult {
    pub ticker: String,
    pub name: String,
    pub exchange: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub market: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub tier: &'static str,
    pub requires_key: bool,
    pub supported_markets: &'static [&'static str],
    pub has_realtime: bool,
    pub rate_limit_per_minute: i64,
    pub description: &'static str,
}

// ==============================================================================
// History periods
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryPeriod {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl HistoryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryPeriod::OneDay => "1d",
            HistoryPeriod::FiveDays => "5d",
            HistoryPeriod::OneMonth => "1mo",
            HistoryPeriod::ThreeMonths => "3mo",
            HistoryPeriod::SixMonths => "6mo",
            HistoryPeriod::OneYear => "1y",
            HistoryPeriod::TwoYears => "2y",
            HistoryPeriod::FiveYears => "5y",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1d" => Some(HistoryPeriod::OneDay),
            "5d" => Some(HistoryPeriod::FiveDays),
            "1mo" => Some(HistoryPeriod::OneMonth),
            "3mo" => Some(HistoryPeriod::ThreeMonths),
            "6mo" => Some(HistoryPeriod::SixMonths),
            "1y" => Some(HistoryPeriod::OneYear),
            "2y" => Some(HistoryPeriod::TwoYears),
            "5y" => Some(HistoryPeriod::FiveYears),
            _ => None,
        }
    }

    /// Approximate number of days covered, used for bar-count heuristics.
    pub fn approx_days(&self) -> u32 {
        match self {
            HistoryPeriod::OneDay => 1,
            HistoryPeriod::FiveDays => 5,
            HistoryPeriod::OneMonth => 30,
            HistoryPeriod::ThreeMonths => 90,
            HistoryPeriod::SixMonths => 180,
            HistoryPeriod::OneYear => 365,
            HistoryPeriod::TwoYears => 730,
            HistoryPeriod::FiveYears => 1825,
        }
    }
}

/// Live price fields carried from a quote fetch into persistence/broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct PriceTick {
    pub price: f64,
    pub change: f64,
    pub change_pct: f64,
    pub volume: i64,
    pub ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_round_trip() {
        for s in ["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y"] {
            let p = HistoryPeriod::parse(s).unwrap();
            assert_eq!(p.as_str(), s);
        }
        assert!(HistoryPeriod::parse("10y").is_none());
    }
}
