use serde_json::json;

use crate::db::watchlist_queries;
use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::services::job_scheduler::JobContext;
use crate::services::market_calendar::{is_market_hours, Market};

pub async fn run_technical_monitor(ctx: JobContext) {
    run_job(ctx, "technical_monitor", "Technical Monitor", body).await;
}

/// RSI/MACD/MA scan over the watchlist via the scanner agent. Skips outside
/// market hours — technical signals on a closed market are noise.
async fn body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    if !is_market_hours(Market::Us) {
        return Ok(JobOutcome::skipped("market closed"));
    }

    let tickers = watchlist_queries::active_tickers(&ctx.pool).await?;
    if tickers.is_empty() {
        return Ok(JobOutcome::skipped("empty watchlist"));
    }

    let (result, _run_id) = ctx
        .agents
        .run("scanner", &json!({"task": "technical_scan", "tickers": tickers}))
        .await?;

    ctx.broadcaster.send_event(
        "technical_alerts",
        json!({
            "signals": result.output,
            "ticker_count": tickers.len(),
        }),
    );

    Ok(JobOutcome::success(format!("scanned {} tickers", tickers.len()))
        .with_agent("scanner")
        .with_cost(result.estimated_cost))
}
