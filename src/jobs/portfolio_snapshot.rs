use chrono::Utc;
use serde_json::json;

use crate::db::{portfolio_queries, rating_queries};
use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::services::job_scheduler::JobContext;

pub async fn run_portfolio_snapshot(ctx: JobContext) {
    run_job(ctx, "portfolio_snapshot", "Portfolio Snapshot", body).await;
}

/// End-of-day portfolio valuation: positions priced against the ratings
/// cache, written as one snapshot row.
async fn body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    let positions = portfolio_queries::list_positions(&ctx.pool).await?;
    if positions.is_empty() {
        return Ok(JobOutcome::skipped("no portfolio positions"));
    }

    let mut total_value = 0.0;
    let mut total_cost = 0.0;
    let mut valued = Vec::new();
    let mut unpriced = 0;

    for position in &positions {
        total_cost += position.cost_basis * position.quantity;
        let price = rating_queries::get_rating(&ctx.pool, &position.ticker)
            .await?
            .and_then(|r| r.current_price);
        match price {
            Some(price) => {
                let value = price * position.quantity;
                total_value += value;
                valued.push(json!({
                    "ticker": position.ticker,
                    "quantity": position.quantity,
                    "price": price,
                    "value": value,
                }));
            }
            None => unpriced += 1,
        }
    }

    let snapshot_date = Utc::now().format("%Y-%m-%d").to_string();
    portfolio_queries::insert_snapshot(
        &ctx.pool,
        &snapshot_date,
        total_value,
        total_cost,
        &serde_json::Value::Array(valued).to_string(),
    )
    .await?;

    Ok(JobOutcome::success(format!(
        "snapshot of {} positions: value ${:.2} (cost ${:.2}), {} unpriced",
        positions.len(),
        total_value,
        total_cost,
        unpriced
    )))
}
