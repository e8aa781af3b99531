use crate::models::job::{AgentSchedule, JobHistory, SchedulerJobRow};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

const RESULT_SUMMARY_CAP: usize = 5000;

// ==============================================================================
// Job history
// ==============================================================================

#[allow(clippy::too_many_arguments)]
pub async fn save_job_history(
    pool: &SqlitePool,
    job_id: &str,
    job_name: &str,
    status: &str,
    result_summary: &str,
    agent_name: Option<&str>,
    duration_ms: i64,
    cost: f64,
) -> Result<(), sqlx::Error> {
    let summary: String = result_summary.chars().take(RESULT_SUMMARY_CAP).collect();
    sqlx::query(
        "INSERT INTO job_history \
         (job_id, job_name, status, result_summary, agent_name, duration_ms, cost, executed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(job_name)
    .bind(status)
    .bind(summary)
    .bind(agent_name)
    .bind(duration_ms)
    .bind(cost)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_job_history(
    pool: &SqlitePool,
    job_id: Option<&str>,
    limit: i64,
) -> Result<Vec<JobHistory>, sqlx::Error> {
    match job_id {
        Some(job_id) => {
            sqlx::query_as::<_, JobHistory>(
                "SELECT * FROM job_history WHERE job_id = ? ORDER BY executed_at DESC LIMIT ?",
            )
            .bind(job_id)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, JobHistory>(
                "SELECT * FROM job_history ORDER BY executed_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
}

/// Most recent successful run for a job, used to seed the SSE snapshot.
pub async fn latest_success(
    pool: &SqlitePool,
    job_id: &str,
) -> Result<Option<JobHistory>, sqlx::Error> {
    sqlx::query_as::<_, JobHistory>(
        "SELECT * FROM job_history WHERE job_id = ? AND status = 'success' \
         ORDER BY executed_at DESC LIMIT 1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

// ==============================================================================
// Performance metrics
// ==============================================================================

pub async fn save_performance_metrics(
    pool: &SqlitePool,
    source: &str,
    source_id: &str,
    metrics: &[(&str, f64)],
    tags: Option<&serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    let tags_json = tags.map(|t| t.to_string());
    for (name, value) in metrics {
        sqlx::query(
            "INSERT INTO performance_metrics \
             (source, source_id, metric_name, metric_value, tags, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(source)
        .bind(source_id)
        .bind(name)
        .bind(value)
        .bind(&tags_json)
        .bind(&now)
        .execute(pool)
        .await?;
    }
    Ok(())
}

// ==============================================================================
// Scheduler job store
// ==============================================================================

pub async fn load_scheduler_jobs(pool: &SqlitePool) -> Result<Vec<SchedulerJobRow>, sqlx::Error> {
    sqlx::query_as::<_, SchedulerJobRow>("SELECT * FROM scheduler_jobs")
        .fetch_all(pool)
        .await
}

pub async fn get_scheduler_job_on(
    conn: &mut SqliteConnection,
    job_id: &str,
) -> Result<Option<SchedulerJobRow>, sqlx::Error> {
    sqlx::query_as::<_, SchedulerJobRow>("SELECT * FROM scheduler_jobs WHERE job_id = ?")
        .bind(job_id)
        .fetch_optional(conn)
        .await
}

pub async fn persist_scheduler_job_on(
    conn: &mut SqliteConnection,
    job_id: &str,
    trigger_type: &str,
    trigger_args: &str,
    enabled: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO scheduler_jobs (job_id, trigger_type, trigger_args, enabled, updated_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(job_id) DO UPDATE SET \
           trigger_type = excluded.trigger_type, \
           trigger_args = excluded.trigger_args, \
           enabled = excluded.enabled, \
           updated_at = excluded.updated_at",
    )
    .bind(job_id)
    .bind(trigger_type)
    .bind(trigger_args)
    .bind(enabled as i64)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_scheduler_job_enabled_on(
    conn: &mut SqliteConnection,
    job_id: &str,
    enabled: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scheduler_jobs SET enabled = ?, updated_at = ? WHERE job_id = ?")
        .bind(enabled as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(conn)
        .await?;
    Ok(())
}

// ==============================================================================
// Agent schedules
// ==============================================================================

pub async fn list_agent_schedules(pool: &SqlitePool) -> Result<Vec<AgentSchedule>, sqlx::Error> {
    sqlx::query_as::<_, AgentSchedule>("SELECT * FROM agent_schedules ORDER BY id")
        .fetch_all(pool)
        .await
}

pub async fn get_agent_schedule_on(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<AgentSchedule>, sqlx::Error> {
    sqlx::query_as::<_, AgentSchedule>("SELECT * FROM agent_schedules WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn insert_agent_schedule_on(
    conn: &mut SqliteConnection,
    job_id: &str,
    trigger_type: &str,
    trigger_args: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO agent_schedules (job_id, trigger_type, trigger_args) VALUES (?, ?, ?)",
    )
    .bind(job_id)
    .bind(trigger_type)
    .bind(trigger_args)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update_agent_schedule_on(
    conn: &mut SqliteConnection,
    id: i64,
    trigger_type: &str,
    trigger_args: &str,
    enabled: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE agent_schedules SET trigger_type = ?, trigger_args = ?, enabled = ? WHERE id = ?",
    )
    .bind(trigger_type)
    .bind(trigger_args)
    .bind(enabled as i64)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_agent_schedule(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM agent_schedules WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
