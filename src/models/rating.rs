use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Cache of per-ticker live prices and analysis-derived scores.
///
/// The price refresh job writes only `current_price`, `price_change`,
/// `price_change_pct`, and `updated_at`; the analytics writer owns the
/// remaining columns. The two column sets never overlap.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiRating {
    pub id: i64,
    pub ticker: String,
    pub rating: String,
    pub score: f64,
    pub confidence: f64,
    pub current_price: Option<f64>,
    pub price_change: Option<f64>,
    pub price_change_pct: Option<f64>,
    pub rsi: Option<f64>,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<String>,
    pub technical_score: Option<f64>,
    pub fundamental_score: Option<f64>,
    pub summary: Option<String>,
    pub updated_at: Option<String>,
}

/// Analysis fields written by the analytics engine (never by price refresh).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisUpdate {
    pub ticker: String,
    pub rating: String,
    pub score: f64,
    pub confidence: f64,
    pub rsi: Option<f64>,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<String>,
    pub technical_score: Option<f64>,
    pub fundamental_score: Option<f64>,
    pub summary: Option<String>,
}

/// Market context assembled for LLM prompts.
#[derive(Debug, Clone, Serialize)]
pub struct MarketContext {
    pub price: f64,
    pub rsi: f64,
    pub sentiment_score: f64,
    pub rating: String,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            price: 0.0,
            rsi: 50.0,
            sentiment_score: 0.0,
            rating: "HOLD".to_string(),
        }
    }
}
