use serde_json::json;

use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::services::job_scheduler::JobContext;
use crate::services::market_calendar::{is_market_hours, Market};

pub async fn run_regime_check(ctx: JobContext) {
    run_job(ctx, "regime_check", "Regime Check", body).await;
}

/// Quick market health pulse. The summary is the regime agent's JSON so the
/// dashboard can read the latest regime straight out of job_history.
async fn body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    if !is_market_hours(Market::Us) {
        return Ok(JobOutcome::skipped("market closed"));
    }

    let (result, _run_id) = ctx
        .agents
        .run("regime", &json!({"task": "regime_check"}))
        .await?;

    let regime = result
        .output
        .get("regime")
        .and_then(|r| r.as_str())
        .unwrap_or("Normal")
        .to_string();

    ctx.broadcaster.send_event(
        "regime_update",
        json!({"regime": regime, "detail": result.output}),
    );

    // The full JSON goes into result_summary; the dashboard parses it.
    Ok(JobOutcome::success(result.output.to_string())
        .with_agent("regime")
        .with_cost(result.estimated_cost))
}
