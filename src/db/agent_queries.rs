use crate::models::agent::{AgentCostByAgent, AgentCostDay, AgentCostSummary, AgentRun};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

pub async fn start_run(
    pool: &SqlitePool,
    agent_name: &str,
    framework: &str,
    input_data: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO agent_runs (agent_name, framework, status, input_data, started_at) \
         VALUES (?, ?, 'running', ?, ?)",
    )
    .bind(agent_name)
    .bind(framework)
    .bind(input_data)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub async fn complete_run(
    pool: &SqlitePool,
    run_id: i64,
    status: &str,
    output_data: Option<&str>,
    tokens_input: i64,
    tokens_output: i64,
    estimated_cost: f64,
    duration_ms: i64,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE agent_runs SET \
           status = ?, output_data = ?, tokens_input = ?, tokens_output = ?, \
           estimated_cost = ?, duration_ms = ?, error = ?, completed_at = ? \
         WHERE id = ?",
    )
    .bind(status)
    .bind(output_data)
    .bind(tokens_input)
    .bind(tokens_output)
    .bind(estimated_cost)
    .bind(duration_ms)
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_run(pool: &SqlitePool, run_id: i64) -> Result<Option<AgentRun>, sqlx::Error> {
    sqlx::query_as::<_, AgentRun>("SELECT * FROM agent_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_runs(
    pool: &SqlitePool,
    agent_name: Option<&str>,
    page: i64,
    page_size: i64,
) -> Result<Vec<AgentRun>, sqlx::Error> {
    let offset = (page.max(1) - 1) * page_size;
    match agent_name {
        Some(name) => {
            sqlx::query_as::<_, AgentRun>(
                "SELECT * FROM agent_runs WHERE agent_name = ? \
                 ORDER BY started_at DESC LIMIT ? OFFSET ?",
            )
            .bind(name)
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, AgentRun>(
                "SELECT * FROM agent_runs ORDER BY started_at DESC LIMIT ? OFFSET ?",
            )
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await
        }
    }
}

/// Recent completed investigator runs, parsed by the sentiment service.
pub async fn recent_investigator_outputs(
    pool: &SqlitePool,
    lookback_hours: i64,
    limit: i64,
) -> Result<Vec<String>, sqlx::Error> {
    let cutoff = (Utc::now() - Duration::hours(lookback_hours)).to_rfc3339();
    let rows: Vec<(Option<String>,)> = sqlx::query_as(
        "SELECT output_data FROM agent_runs \
         WHERE agent_name = 'investigator' AND status = 'completed' AND completed_at >= ? \
         ORDER BY completed_at DESC LIMIT ?",
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().filter_map(|(o,)| o).collect())
}

/// Aggregate cost over a rolling window, grouped by agent and by day.
pub async fn cost_summary(
    pool: &SqlitePool,
    window_days: i64,
) -> Result<AgentCostSummary, sqlx::Error> {
    let cutoff = (Utc::now() - Duration::days(window_days)).to_rfc3339();

    let totals: (i64, Option<f64>) = sqlx::query_as(
        "SELECT COUNT(*), SUM(estimated_cost) FROM agent_runs WHERE started_at >= ?",
    )
    .bind(&cutoff)
    .fetch_one(pool)
    .await?;

    let by_agent_rows: Vec<(String, i64, Option<f64>, Option<f64>)> = sqlx::query_as(
        "SELECT agent_name, COUNT(*), SUM(estimated_cost), AVG(duration_ms) \
         FROM agent_runs WHERE started_at >= ? \
         GROUP BY agent_name ORDER BY SUM(estimated_cost) DESC",
    )
    .bind(&cutoff)
    .fetch_all(pool)
    .await?;

    let by_day_rows: Vec<(String, i64, Option<f64>, Option<i64>, Option<i64>)> = sqlx::query_as(
        "SELECT substr(started_at, 1, 10), COUNT(*), SUM(estimated_cost), \
                SUM(tokens_input), SUM(tokens_output) \
         FROM agent_runs WHERE started_at >= ? \
         GROUP BY substr(started_at, 1, 10) ORDER BY 1",
    )
    .bind(&cutoff)
    .fetch_all(pool)
    .await?;

    Ok(AgentCostSummary {
        window_days,
        total_cost: totals.1.unwrap_or(0.0),
        total_runs: totals.0,
        by_agent: by_agent_rows
            .into_iter()
            .map(|(agent_name, runs, cost, avg_ms)| AgentCostByAgent {
                agent_name,
                runs,
                total_cost: cost.unwrap_or(0.0),
                avg_duration_ms: avg_ms.unwrap_or(0.0),
            })
            .collect(),
        by_day: by_day_rows
            .into_iter()
            .map(|(day, runs, cost, tin, tout)| AgentCostDay {
                day,
                runs,
                total_cost: cost.unwrap_or(0.0),
                tokens_input: tin.unwrap_or(0),
                tokens_output: tout.unwrap_or(0),
            })
            .collect(),
    })
}
