use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::db::job_queries;
use crate::errors::AppError;
use crate::services::job_scheduler::JobContext;

/// What a job body reports back to the timer wrapper.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub summary: String,
    pub agent_name: Option<String>,
    pub cost: f64,
    pub skipped: bool,
}

impl JobOutcome {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            agent_name: None,
            cost: 0.0,
            skipped: false,
        }
    }

    pub fn skipped(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            agent_name: None,
            cost: 0.0,
            skipped: true,
        }
    }

    pub fn with_agent(mut self, agent_name: &str) -> Self {
        self.agent_name = Some(agent_name.to_string());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

/// Timer wrapper every scheduled job runs through.
///
/// Persists a `job_history` row, emits duration/cost/success points into
/// `performance_metrics`, and notifies connected UIs with a `job_completed`
/// SSE event. A failing job body flips status to 'error'; nothing ever
/// propagates out of here, so a bad job can never take down the scheduler.
pub async fn run_job<F, Fut>(ctx: JobContext, job_id: &'static str, job_name: &'static str, body: F)
where
    F: FnOnce(JobContext) -> Fut,
    Fut: std::future::Future<Output = Result<JobOutcome, AppError>>,
{
    info!("[JOB START] {} ({})", job_id, job_name);
    let started = std::time::Instant::now();

    let (status, summary, agent_name, cost) = match body(ctx.clone()).await {
        Ok(outcome) if outcome.skipped => ("skipped", outcome.summary, outcome.agent_name, outcome.cost),
        Ok(outcome) => ("success", outcome.summary, outcome.agent_name, outcome.cost),
        Err(e) => {
            error!("[JOB ERROR] {}: {}", job_id, e);
            ("error", format!("Error: {e}"), None, 0.0)
        }
    };

    let duration_ms = started.elapsed().as_millis() as i64;

    if let Err(e) = job_queries::save_job_history(
        &ctx.pool,
        job_id,
        job_name,
        status,
        &summary,
        agent_name.as_deref(),
        duration_ms,
        cost,
    )
    .await
    {
        error!("failed to save job_history for {}: {}", job_id, e);
    }

    info!(
        "[JOB END] {} -- status={}, duration={}ms",
        job_id, status, duration_ms
    );

    let mut tags = json!({"job_name": job_name, "status": status});
    if let Some(agent) = &agent_name {
        tags["agent_name"] = json!(agent);
    }
    if let Err(e) = job_queries::save_performance_metrics(
        &ctx.pool,
        "job",
        job_id,
        &[
            ("duration_ms", duration_ms as f64),
            ("cost_usd", cost),
            ("success", if status == "success" { 1.0 } else { 0.0 }),
        ],
        Some(&tags),
    )
    .await
    {
        error!("failed to save performance_metrics for {}: {}", job_id, e);
    }

    ctx.broadcaster.send_event(
        "job_completed",
        json!({
            "job_id": job_id,
            "job_name": job_name,
            "status": status,
            "result_summary": summary,
            "duration_ms": duration_ms,
            "completed_at": Utc::now().to_rfc3339(),
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::schema::init_all_tables;
    use crate::external::registry::ProviderRegistry;
    use crate::services::agent_service::AgentRegistry;
    use crate::services::broadcast::Broadcaster;
    use crate::services::latency_buffer::LatencyBuffer;
    use crate::services::settings_service::SettingsService;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    pub async fn test_ctx() -> JobContext {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();
        JobContext {
            pool: pool.clone(),
            config: Arc::new(Config::from_env()),
            broadcaster: Arc::new(Broadcaster::new(50)),
            providers: Arc::new(ProviderRegistry::new(None)),
            settings: Arc::new(SettingsService::new(pool.clone())),
            agents: Arc::new(AgentRegistry::empty(pool)),
            latency: Arc::new(LatencyBuffer::new()),
        }
    }

    #[tokio::test]
    async fn test_success_writes_history_metrics_and_sse() {
        let ctx = test_ctx().await;
        let (_id, mut rx) = ctx.broadcaster.register_sse();

        run_job(ctx.clone(), "test_job", "Test Job", |_ctx| async {
            Ok(JobOutcome::success("did the thing").with_agent("scanner").with_cost(0.02))
        })
        .await;

        let rows = job_queries::get_job_history(&ctx.pool, Some("test_job"), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "success");
        assert_eq!(rows[0].result_summary.as_deref(), Some("did the thing"));
        assert_eq!(rows[0].agent_name.as_deref(), Some("scanner"));
        assert!((rows[0].cost - 0.02).abs() < 1e-9);

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM performance_metrics WHERE source = 'job' AND source_id = 'test_job'",
        )
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
        assert_eq!(count, 3);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "job_completed");
        assert_eq!(event.data["status"], "success");
    }

    #[tokio::test]
    async fn test_error_is_contained_and_recorded() {
        let ctx = test_ctx().await;

        run_job(ctx.clone(), "bad_job", "Bad Job", |_ctx| async {
            Err::<JobOutcome, _>(AppError::Internal("boom".to_string()))
        })
        .await;

        let rows = job_queries::get_job_history(&ctx.pool, Some("bad_job"), 10)
            .await
            .unwrap();
        assert_eq!(rows[0].status, "error");
        assert!(rows[0].result_summary.as_ref().unwrap().starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_skipped_status() {
        let ctx = test_ctx().await;
        run_job(ctx.clone(), "skippy", "Skippy", |_ctx| async {
            Ok(JobOutcome::skipped("market closed"))
        })
        .await;

        let rows = job_queries::get_job_history(&ctx.pool, Some("skippy"), 10)
            .await
            .unwrap();
        assert_eq!(rows[0].status, "skipped");
    }
}
