use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EarningsEvent {
    pub id: i64,
    pub ticker: String,
    pub company: Option<String>,
    pub earnings_date: String,
    pub time_of_day: Option<String>,
    pub eps_estimate: Option<f64>,
    pub eps_actual: Option<f64>,
    pub revenue_estimate: Option<f64>,
    pub revenue_actual: Option<f64>,
    pub fiscal_quarter: Option<String>,
    pub fetched_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Incoming earnings row from a data provider, upserted keyed on
/// (ticker, earnings_date). Null actuals never overwrite stored actuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsUpsert {
    pub ticker: String,
    pub company: Option<String>,
    pub earnings_date: String,
    pub time_of_day: Option<String>,
    pub eps_estimate: Option<f64>,
    pub eps_actual: Option<f64>,
    pub revenue_estimate: Option<f64>,
    pub revenue_actual: Option<f64>,
    pub fiscal_quarter: Option<String>,
}
