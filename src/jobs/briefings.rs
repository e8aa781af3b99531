//! The digest jobs: morning briefing, daily summary, and weekly review.
//! Each composes one or more agent calls into a human-readable recap and
//! pushes it over SSE.

use serde_json::json;

use crate::db::{job_queries, rating_queries};
use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::services::job_scheduler::JobContext;

pub async fn run_morning_briefing(ctx: JobContext) {
    run_job(ctx, "morning_briefing", "Morning Briefing", morning_body).await;
}

pub async fn run_daily_summary(ctx: JobContext) {
    run_job(ctx, "daily_summary", "Daily Summary", daily_body).await;
}

pub async fn run_weekly_review(ctx: JobContext) {
    run_job(ctx, "weekly_review", "Weekly Review", weekly_body).await;
}

/// Pre-market summary: overnight moves plus a fresh regime assessment.
async fn morning_body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    let ratings = rating_queries::list_ratings(&ctx.pool).await?;
    let movers: Vec<_> = ratings
        .iter()
        .filter(|r| r.price_change_pct.map(|p| p.abs() >= 2.0).unwrap_or(false))
        .map(|r| json!({"ticker": r.ticker, "change_pct": r.price_change_pct}))
        .collect();
    let mover_count = movers.len();

    let (scan, _) = ctx
        .agents
        .run("scanner", &json!({"task": "premarket_scan", "movers": movers}))
        .await?;
    let (regime, _) = ctx
        .agents
        .run("regime", &json!({"task": "premarket_regime"}))
        .await?;

    let cost = scan.estimated_cost + regime.estimated_cost;
    ctx.broadcaster.send_event(
        "morning_briefing",
        json!({"scan": scan.output, "regime": regime.output}),
    );

    Ok(JobOutcome::success(format!(
        "briefing with {} pre-market movers across {} tickers",
        mover_count,
        ratings.len()
    ))
    .with_agent("scanner")
    .with_cost(cost))
}

/// End-of-day digest: closing prices, the latest regime verdict, and the
/// day's job activity, composed by the reporter agent.
async fn daily_body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    let ratings = rating_queries::list_ratings(&ctx.pool).await?;
    let closes: Vec<_> = ratings
        .iter()
        .map(|r| {
            json!({
                "ticker": r.ticker,
                "close": r.current_price,
                "change_pct": r.price_change_pct,
            })
        })
        .collect();

    let last_regime = job_queries::latest_success(&ctx.pool, "regime_check")
        .await?
        .and_then(|row| row.result_summary)
        .unwrap_or_default();
    let recent_jobs = job_queries::get_job_history(&ctx.pool, None, 20).await?;
    let job_recap: Vec<_> = recent_jobs
        .iter()
        .map(|j| json!({"job": j.job_id, "status": j.status}))
        .collect();

    let (report, _) = ctx
        .agents
        .run(
            "reporter",
            &json!({
                "task": "daily_summary",
                "closes": closes,
                "regime": last_regime,
                "jobs": job_recap,
            }),
        )
        .await?;

    ctx.broadcaster
        .send_event("daily_summary", json!({"report": report.output}));

    Ok(JobOutcome::success(format!("daily digest over {} tickers", closes.len()))
        .with_agent("reporter")
        .with_cost(report.estimated_cost))
}

/// Weekly portfolio review with cost tracking over the trailing seven days.
async fn weekly_body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    let costs = ctx.agents.cost_summary(7).await?;
    let ratings = rating_queries::list_ratings(&ctx.pool).await?;

    let (report, _) = ctx
        .agents
        .run(
            "reporter",
            &json!({
                "task": "weekly_review",
                "tickers": ratings.iter().map(|r| &r.ticker).collect::<Vec<_>>(),
                "agent_costs": {
                    "total_cost": costs.total_cost,
                    "total_runs": costs.total_runs,
                },
            }),
        )
        .await?;

    ctx.broadcaster.send_event(
        "weekly_review",
        json!({"report": report.output, "week_cost": costs.total_cost}),
    );

    Ok(JobOutcome::success(format!(
        "weekly review, {} agent runs costing ${:.2}",
        costs.total_runs, costs.total_cost
    ))
    .with_agent("reporter")
    .with_cost(report.estimated_cost))
}
