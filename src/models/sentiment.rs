use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SentimentCacheRow {
    pub ticker: String,
    pub score: f64,
    pub label: String,
    pub signal_count: i64,
    pub sources: String,
    pub updated_at: String,
}

/// Per-source signal tallies over the lookback windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SignalCounts {
    pub bullish: i64,
    pub bearish: i64,
    pub neutral: i64,
}

impl SignalCounts {
    pub fn total(&self) -> i64 {
        self.bullish + self.bearish + self.neutral
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentView {
    pub ticker: String,
    pub score: Option<f64>,
    pub label: String,
    pub signal_count: i64,
    pub sources: serde_json::Value,
    pub updated_at: String,
    pub stale: bool,
    pub trend: String,
}
