use crate::models::comparison::{CompareResult, ComparisonResult, ComparisonRun};
use chrono::Utc;
use sqlx::SqlitePool;

// ==============================================================================
// Synchronous compare runs (ai_comparison_*)
// ==============================================================================

pub async fn persist_sync_run(
    pool: &SqlitePool,
    run_id: &str,
    ticker: &str,
    providers_json: &str,
    results: &[CompareResult],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO ai_comparison_runs (id, ticker, providers, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(ticker)
    .bind(providers_json)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    for r in results {
        sqlx::query(
            "INSERT INTO ai_comparison_results \
             (run_id, provider, model, rating, score, confidence, summary, duration_ms, error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(&r.provider)
        .bind(&r.model)
        .bind(&r.rating)
        .bind(r.score)
        .bind(r.confidence)
        .bind(&r.summary)
        .bind(r.duration_ms)
        .bind(&r.error)
        .execute(pool)
        .await?;
    }
    Ok(())
}

// ==============================================================================
// Asynchronous comparison runs (comparison_*)
// ==============================================================================

pub async fn create_run(
    pool: &SqlitePool,
    run_id: &str,
    prompt: Option<&str>,
    ticker: Option<&str>,
    template: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO comparison_runs (id, prompt, ticker, status, template, created_at) \
         VALUES (?, ?, ?, 'pending', ?, ?)",
    )
    .bind(run_id)
    .bind(prompt)
    .bind(ticker)
    .bind(template)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_run_status(
    pool: &SqlitePool,
    run_id: &str,
    status: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE comparison_runs SET status = ? WHERE id = ?")
        .bind(status)
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_result(
    pool: &SqlitePool,
    run_id: &str,
    provider_name: &str,
    model: Option<&str>,
    response: Option<&str>,
    tokens_used: i64,
    latency_ms: i64,
    error: Option<&str>,
    extracted: Option<&crate::models::comparison::ParsedAnalysis>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO comparison_results \
         (run_id, provider_name, model, response, tokens_used, latency_ms, error, \
          extracted_rating, extracted_score, extracted_confidence, extracted_summary) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(provider_name)
    .bind(model)
    .bind(response)
    .bind(tokens_used)
    .bind(latency_ms)
    .bind(error)
    .bind(extracted.map(|p| p.rating.clone()))
    .bind(extracted.map(|p| p.score))
    .bind(extracted.map(|p| p.confidence))
    .bind(extracted.map(|p| p.summary.clone()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<ComparisonRun>, sqlx::Error> {
    sqlx::query_as::<_, ComparisonRun>("SELECT * FROM comparison_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await
}

pub async fn results_for_run(
    pool: &SqlitePool,
    run_id: &str,
) -> Result<Vec<ComparisonResult>, sqlx::Error> {
    sqlx::query_as::<_, ComparisonResult>(
        "SELECT * FROM comparison_results WHERE run_id = ? ORDER BY id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
}

pub async fn list_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<ComparisonRun>, sqlx::Error> {
    sqlx::query_as::<_, ComparisonRun>(
        "SELECT * FROM comparison_runs ORDER BY created_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

// ==============================================================================
// Configured AI providers
// ==============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfiguredProvider {
    pub id: i64,
    pub provider_name: String,
    pub api_key: String,
    pub model: Option<String>,
}

pub async fn configured_providers(
    pool: &SqlitePool,
) -> Result<Vec<ConfiguredProvider>, sqlx::Error> {
    sqlx::query_as::<_, ConfiguredProvider>(
        "SELECT id, provider_name, api_key, model FROM ai_providers \
         WHERE api_key IS NOT NULL AND api_key != ''",
    )
    .fetch_all(pool)
    .await
}

pub async fn provider_api_key(
    pool: &SqlitePool,
    provider_name: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT api_key FROM ai_providers \
         WHERE provider_name = ? AND api_key IS NOT NULL AND api_key != '' LIMIT 1",
    )
    .bind(provider_name)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(k,)| k))
}

pub async fn upsert_provider(
    pool: &SqlitePool,
    provider_name: &str,
    api_key: &str,
    model: Option<&str>,
) -> Result<(), sqlx::Error> {
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM ai_providers WHERE provider_name = ? LIMIT 1")
            .bind(provider_name)
            .fetch_optional(pool)
            .await?;

    match existing {
        Some((id,)) => {
            sqlx::query(
                "UPDATE ai_providers SET api_key = ?, model = ?, updated_at = ? WHERE id = ?",
            )
            .bind(api_key)
            .bind(model)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO ai_providers (provider_name, api_key, model, is_active) \
                 VALUES (?, ?, ?, 1)",
            )
            .bind(provider_name)
            .bind(api_key)
            .bind(model)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

pub async fn delete_provider(pool: &SqlitePool, provider_name: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM ai_providers WHERE provider_name = ?")
        .bind(provider_name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
