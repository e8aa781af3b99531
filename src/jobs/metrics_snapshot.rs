use sysinfo::System;
use tracing::info;

use crate::db::metrics_queries;
use crate::db::pool::pool_stats;
use crate::errors::AppError;
use crate::jobs::helpers::{run_job, JobOutcome};
use crate::services::job_scheduler::JobContext;

pub async fn run_metrics_snapshot(ctx: JobContext) {
    run_job(ctx, "metrics_snapshot", "Metrics Snapshot", body).await;
}

/// Five-minute system pulse: CPU/memory/pool stats into perf_snapshots,
/// the in-memory API latency buffer drained into api_request_log, and
/// retention pruning for the metrics tables.
async fn body(ctx: JobContext) -> Result<JobOutcome, AppError> {
    // CPU usage needs two samples a beat apart.
    let (cpu_pct, mem_pct) = tokio::task::spawn_blocking(|| {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = sys.global_cpu_usage() as f64;
        let mem = if sys.total_memory() > 0 {
            sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
        } else {
            0.0
        };
        (cpu, mem)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    let stats = pool_stats(&ctx.pool);
    metrics_queries::insert_perf_snapshot(
        &ctx.pool,
        cpu_pct,
        mem_pct,
        stats.in_use as i64,
        stats.available as i64,
    )
    .await?;

    // Drain the latency buffer: call_count accumulates on conflict, the
    // percentiles are overwritten with the freshest window.
    let rows = ctx.latency.flush();
    let flushed = rows.len();
    metrics_queries::flush_api_request_log(&ctx.pool, &rows).await?;

    let (perf_pruned, api_pruned, ui_pruned) = metrics_queries::prune_metrics_tables(&ctx.pool).await?;
    if perf_pruned + api_pruned + ui_pruned > 0 {
        info!(
            "metrics_snapshot: pruned {} perf, {} api_log, {} ui_state rows",
            perf_pruned, api_pruned, ui_pruned
        );
    }

    Ok(JobOutcome::success(format!(
        "cpu={cpu_pct:.1}% mem={mem_pct:.1}% pool={}/{} latency_rows={flushed} pruned={}",
        stats.in_use,
        stats.size,
        perf_pruned + api_pruned + ui_pruned
    )))
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

    #[tokio::test]
    async fn test_snapshot_flushes_latency_buffer() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();

        let latency = Arc::new(LatencyBuffer::new());
        latency.record("/api/stocks", "GET", 200, 12.0);
        latency.record("/api/stocks", "GET", 200, 18.0);

        let ctx = JobContext {
            pool: pool.clone(),
            config: Arc::new(Config::from_env()),
            broadcaster: Arc::new(Broadcaster::new(50)),
            providers: Arc::new(ProviderRegistry::new(None)),
            settings: Arc::new(SettingsService::new(pool.clone())),
            agents: Arc::new(AgentRegistry::empty(pool.clone())),
            latency: latency.clone(),
        };

        run_metrics_snapshot(ctx).await;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM perf_snapshots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let (calls,): (i64,) = sqlx::query_as(
            "SELECT call_count FROM api_request_log WHERE endpoint = '/api/stocks'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(calls, 2);

        // Buffer drained.
        assert!(latency.flush().is_empty());
    }

    #[tokio::test]
    async fn test_api_log_accumulates_across_flushes() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();

        let latency = LatencyBuffer::new();
        latency.record("/api/alerts", "GET", 200, 10.0);
        metrics_queries::flush_api_request_log(&pool, &latency.flush())
            .await
            .unwrap();
        latency.record("/api/alerts", "GET", 200, 30.0);
        metrics_queries::flush_api_request_log(&pool, &latency.flush())
            .await
            .unwrap();

        let (calls, p95): (i64, f64) = sqlx::query_as(
            "SELECT call_count, p95_ms FROM api_request_log WHERE endpoint = '/api/alerts'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        // call_count accumulates, p95 reflects only the latest window.
        assert_eq!(calls, 2);
        assert_eq!(p95, 30.0);
    }
}
