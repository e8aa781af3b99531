use serde::Deserialize;
use tracing::{debug, info};

use crate::db::{earnings_queries, watchlist_queries};
use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::models::earnings::EarningsUpsert;
use crate::services::job_scheduler::JobContext;

pub async fn run_earnings_sync(ctx: JobContext) {
    run_job(ctx, "earnings_sync", "Earnings Sync", body).await;
}

// Yahoo quoteSummary shapes — just the fields the sync consumes.

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryBody {
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResult {
    #[serde(rename = "calendarEvents")]
    calendar_events: Option<CalendarEvents>,
    #[serde(rename = "earningsHistory")]
    earnings_history: Option<EarningsHistory>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvents {
    earnings: Option<CalendarEarnings>,
}

#[derive(Debug, Deserialize)]
struct CalendarEarnings {
    #[serde(rename = "earningsDate", default)]
    earnings_date: Vec<RawValue>,
    #[serde(rename = "earningsAverage")]
    earnings_average: Option<RawValue>,
    #[serde(rename = "revenueAverage")]
    revenue_average: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
struct EarningsHistory {
    #[serde(default)]
    history: Vec<EarningsHistoryRow>,
}

#[derive(Debug, Deserialize)]
struct EarningsHistoryRow {
    quarter: Option<RawValue>,
    #[serde(rename = "epsEstimate")]
    eps_estimate: Option<RawValue>,
    #[serde(rename = "epsActual")]
    eps_actual: Option<RawValue>,
    period: Option<String>,
}

/// Yahoo wraps scalars as {"raw": ..., "fmt": "..."}.
#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
    fmt: Option<String>,
}

fn epoch_to_date(epoch: f64) -> Option<String> {
    chrono::DateTime::from_timestamp(epoch as i64, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
}

async fn fetch_earnings(client: &reqwest::Client, ticker: &str) -> Vec<EarningsUpsert> {
    let url = format!(
        "https://query1.finance.yahoo.com/v10/finance/quoteSummary/{ticker}?modules=calendarEvents,earningsHistory"
    );
    let body = match client.get(&url).send().await {
        Ok(resp) => match resp.json::<QuoteSummaryResponse>().await {
            Ok(body) => body,
            Err(e) => {
                debug!("earnings_sync: parse failed for {}: {}", ticker, e);
                return Vec::new();
            }
        },
        Err(e) => {
            debug!("earnings_sync: fetch failed for {}: {}", ticker, e);
            return Vec::new();
        }
    };

    let Some(result) = body.quote_summary.result.and_then(|mut r| r.pop()) else {
        return Vec::new();
    };

    let mut events = Vec::new();

    // Upcoming: calendarEvents gives the next date(s) plus estimates.
    if let Some(earnings) = result.calendar_events.and_then(|c| c.earnings) {
        for date in &earnings.earnings_date {
            let Some(day) = date.raw.and_then(epoch_to_date) else {
                continue;
            };
            events.push(EarningsUpsert {
                ticker: ticker.to_string(),
                company: None,
                earnings_date: day,
                time_of_day: date.fmt.clone(),
                eps_estimate: earnings.earnings_average.as_ref().and_then(|v| v.raw),
                eps_actual: None,
                revenue_estimate: earnings.revenue_average.as_ref().and_then(|v| v.raw),
                revenue_actual: None,
                fiscal_quarter: None,
            });
        }
    }

    // Past: earningsHistory carries actuals per quarter.
    if let Some(history) = result.earnings_history {
        for row in history.history {
            let Some(day) = row.quarter.as_ref().and_then(|q| q.raw).and_then(epoch_to_date)
            else {
                continue;
            };
            events.push(EarningsUpsert {
                ticker: ticker.to_string(),
                company: None,
                earnings_date: day,
                time_of_day: None,
                eps_estimate: row.eps_estimate.as_ref().and_then(|v| v.raw),
                eps_actual: row.eps_actual.as_ref().and_then(|v| v.raw),
                revenue_estimate: None,
                revenue_actual: None,
                fiscal_quarter: row.period,
            });
        }
    }

    events
}

/// Nightly calendar sync: upcoming and past earnings for every watchlist
/// ticker, batch-upserted keyed on (ticker, earnings_date). Incoming nulls
/// never erase stored actuals.
async fn body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    let tickers = watchlist_queries::active_tickers(&ctx.pool).await?;
    if tickers.is_empty() {
        return Ok(JobOutcome::skipped("empty watchlist"));
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .user_agent("Mozilla/5.0 (compatible; TickerPulse/3.0)")
        .build()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let mut all_events = Vec::new();
    let mut fetched = 0;
    for ticker in &tickers {
        let events = fetch_earnings(&client, ticker).await;
        if !events.is_empty() {
            fetched += 1;
        }
        all_events.extend(events);
    }

    let upserted = earnings_queries::upsert_events(&ctx.pool, &all_events).await?;
    info!(
        "earnings_sync: {} events across {}/{} tickers",
        all_events.len(),
        fetched,
        tickers.len()
    );

    Ok(JobOutcome::success(format!(
        "synced {} earnings events for {}/{} tickers ({} rows written)",
        all_events.len(),
        fetched,
        tickers.len(),
        upserted
    )))
}
