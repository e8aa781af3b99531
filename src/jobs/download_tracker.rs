use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::db::portfolio_queries;
use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::services::job_scheduler::JobContext;

pub async fn run_download_tracker(ctx: JobContext) {
    run_job(ctx, "download_tracker", "Download Tracker", body).await;
}

#[derive(Debug, Deserialize)]
struct CloneTraffic {
    #[serde(default)]
    count: i64,
    #[serde(default)]
    uniques: i64,
    #[serde(default)]
    clones: Vec<CloneDay>,
}

#[derive(Debug, Deserialize)]
struct CloneDay {
    timestamp: String,
    count: i64,
    uniques: i64,
}

/// Daily GitHub clone-traffic pull for the configured repositories.
async fn body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    if ctx.config.github_token.is_empty() || ctx.config.github_repos.is_empty() {
        return Ok(JobOutcome::skipped("no GitHub token or repos configured"));
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .user_agent("tickerpulse-download-tracker")
        .build()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let mut tracked = 0;
    for (owner, repo) in &ctx.config.github_repos {
        let url = format!("https://api.github.com/repos/{owner}/{repo}/traffic/clones");
        let traffic = match client
            .get(&url)
            .bearer_auth(&ctx.config.github_token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => match resp.json::<CloneTraffic>().await {
                Ok(traffic) => traffic,
                Err(e) => {
                    debug!("download_tracker: parse failed for {}/{}: {}", owner, repo, e);
                    continue;
                }
            },
            Ok(resp) => {
                debug!("download_tracker: {}/{} returned {}", owner, repo, resp.status());
                continue;
            }
            Err(e) => {
                debug!("download_tracker: fetch failed for {}/{}: {}", owner, repo, e);
                continue;
            }
        };

        let period_start = traffic.clones.first().map(|d| d.timestamp.clone());
        let period_end = traffic.clones.last().map(|d| d.timestamp.clone());
        portfolio_queries::insert_download_stat(
            &ctx.pool,
            owner,
            repo,
            traffic.count,
            traffic.uniques,
            period_start.as_deref(),
            period_end.as_deref(),
        )
        .await?;

        for day in &traffic.clones {
            let date = day.timestamp.chars().take(10).collect::<String>();
            portfolio_queries::upsert_download_daily(
                &ctx.pool,
                owner,
                repo,
                &date,
                day.count,
                day.uniques,
            )
            .await?;
        }
        tracked += 1;
    }

    ctx.broadcaster
        .send_event("download_tracker", json!({"repos_tracked": tracked}));

    Ok(JobOutcome::success(format!(
        "tracked {}/{} repos",
        tracked,
        ctx.config.github_repos.len()
    )))
}
