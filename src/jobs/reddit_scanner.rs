use serde_json::json;

use crate::db::watchlist_queries;
use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::services::job_scheduler::JobContext;

pub async fn run_reddit_scan(ctx: JobContext) {
    run_job(ctx, "reddit_scanner", "Reddit Scanner", body).await;
}

/// Hourly sweep of retail-investor chatter. The investigator's output is
/// what the sentiment service later mines for Reddit signals, so the run is
/// tagged with the reddit_scan task marker.
async fn body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    let tickers = watchlist_queries::active_tickers(&ctx.pool).await?;
    if tickers.is_empty() {
        return Ok(JobOutcome::skipped("empty watchlist"));
    }

    let (result, _run_id) = ctx
        .agents
        .run(
            "investigator",
            &json!({
                "task": "reddit_scan",
                "subreddits": ["wallstreetbets", "stocks", "investing"],
                "tickers": tickers,
            }),
        )
        .await?;

    ctx.broadcaster
        .send_event("reddit_trending", json!({"trending": result.output}));

    Ok(JobOutcome::success(format!("scanned chatter for {} tickers", tickers.len()))
        .with_agent("investigator")
        .with_cost(result.estimated_cost))
}
