use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use sqlx::SqlitePool;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{comparison_queries, rating_queries};
use crate::errors::AppError;
use crate::llm::parse::parse_structured_response;
use crate::llm::providers::ProviderFactory;
use crate::models::comparison::{
    CompareRequest, CompareResponse, CompareResult, CreateComparisonRunRequest, ProviderChoice,
};
use crate::models::rating::MarketContext;

pub const MAX_PROVIDERS: usize = 4;
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);
const FANOUT_TIMEOUT: Duration = Duration::from_secs(35);
const ASYNC_RUN_TIMEOUT: Duration = Duration::from_secs(120);
const SYNC_MAX_TOKENS: u32 = 600;
const ASYNC_MAX_TOKENS: u32 = 500;

const VALID_TEMPLATES: &[&str] = &["custom", "bull_bear_thesis", "risk_summary", "price_target"];

// ==============================================================================
// Prompt building
// ==============================================================================

fn build_analysis_prompt(ticker: &str, ctx: &MarketContext) -> String {
    let price = if ctx.price > 0.0 {
        format!("{:.2}", ctx.price)
    } else {
        "N/A".to_string()
    };
    format!(
        "You are a financial analyst. Analyze {ticker} stock and provide a structured investment assessment.\n\
         \n\
         Market Context:\n\
         - Current Price: ${price}\n\
         - RSI (14-period): {rsi:.1}\n\
         - News Sentiment: {sentiment:.2} (scale: -1.0 very negative to +1.0 very positive)\n\
         - Current AI Rating: {rating}\n\
         \n\
         Based on this information and your knowledge of {ticker}, respond with ONLY a JSON object \
         in this exact format (no other text, no markdown):\n\
         {{\"rating\": \"BUY\", \"score\": 75, \"confidence\": 80, \"summary\": \"2-3 sentence analysis here.\"}}\n\
         \n\
         Rules:\n\
         - rating must be exactly \"BUY\", \"HOLD\", or \"SELL\"\n\
         - score: integer 0-100 representing overall investment attractiveness\n\
         - confidence: integer 0-100 representing your confidence in this assessment\n\
         - summary: 2-3 plain-text sentences, no markdown formatting",
        rsi = ctx.rsi,
        sentiment = ctx.sentiment_score,
        rating = ctx.rating,
    )
}

async fn stock_context(pool: &SqlitePool, ticker: &str) -> String {
    if ticker.is_empty() {
        return String::new();
    }
    match rating_queries::get_rating(pool, ticker).await {
        Ok(Some(rating)) => {
            let mut parts = vec![format!("Ticker: {ticker}")];
            parts.push(format!(
                "Current Rating: {} (Score: {}/100)",
                rating.rating, rating.score
            ));
            if let Some(rsi) = rating.rsi {
                parts.push(format!("RSI: {rsi}"));
            }
            if let Some(sentiment) = rating.sentiment_score {
                parts.push(format!("Sentiment Score: {sentiment}"));
            }
            if let Some(summary) = rating.summary {
                parts.push(format!("Latest Analysis: {summary}"));
            }
            format!("{}\n\n", parts.join("\n"))
        }
        _ => format!("Ticker: {ticker}\n\n"),
    }
}

/// Expand a comparison template into the final prompt. Only 'custom' is a
/// true pass-through; the others prepend a role plus stock context.
pub async fn expand_template(pool: &SqlitePool, template: &str, prompt: &str, ticker: &str) -> String {
    let role = match template {
        "bull_bear_thesis" => {
            "You are a financial analyst. Analyze the following stock and provide a structured \
             bull/bear thesis with clear arguments for and against investment."
        }
        "risk_summary" => {
            "You are a financial risk analyst. Provide a concise risk summary for this stock, \
             covering market risk, fundamental risk, and technical risk factors."
        }
        "price_target" => {
            "You are a financial analyst. Provide a 12-month price target rationale for this stock, \
             including key assumptions, growth catalysts, and valuation methodology."
        }
        _ => return prompt.to_string(),
    };
    let context = stock_context(pool, ticker).await;
    format!("{role}\n\n{context}Analysis request: {prompt}")
}

// ==============================================================================
// Key resolution
// ==============================================================================

async fn resolve_api_key(pool: &SqlitePool, config: &Config, provider: &str) -> String {
    let env_key = match provider.to_lowercase().as_str() {
        "anthropic" => config.anthropic_api_key.clone(),
        "openai" => config.openai_api_key.clone(),
        "google" => config.google_ai_key.clone(),
        "grok" | "xai" => config.xai_api_key.clone(),
        _ => String::new(),
    };
    if !env_key.is_empty() {
        return env_key;
    }
    comparison_queries::provider_api_key(pool, provider)
        .await
        .ok()
        .flatten()
        .unwrap_or_default()
}

// ==============================================================================
// Synchronous compare
// ==============================================================================

fn error_slot(choice: &ProviderChoice, error: &str, duration_ms: i64) -> CompareResult {
    CompareResult {
        provider: choice.provider.clone(),
        model: choice.model.clone().unwrap_or_default(),
        rating: None,
        score: None,
        confidence: None,
        summary: None,
        duration_ms,
        error: Some(error.to_string()),
    }
}

async fn call_one_provider(
    pool: SqlitePool,
    config: Config,
    choice: ProviderChoice,
    prompt: String,
) -> CompareResult {
    let started = std::time::Instant::now();
    let elapsed_ms = |s: &std::time::Instant| s.elapsed().as_millis() as i64;

    let api_key = resolve_api_key(&pool, &config, &choice.provider).await;
    if api_key.is_empty() {
        return error_slot(
            &choice,
            &format!("No API key configured for {}", choice.provider),
            0,
        );
    }

    let provider = match ProviderFactory::create(&choice.provider, api_key, choice.model.clone()) {
        Ok(p) => p,
        Err(e) => return error_slot(&choice, &e.to_string(), 0),
    };

    match provider
        .generate_analysis_with_usage(&prompt, SYNC_MAX_TOKENS)
        .await
    {
        Ok((text, _tokens)) => {
            let duration_ms = elapsed_ms(&started);
            match parse_structured_response(&text) {
                Some(parsed) => CompareResult {
                    provider: choice.provider.clone(),
                    model: provider.model().to_string(),
                    rating: Some(parsed.rating),
                    score: Some(parsed.score),
                    confidence: Some(parsed.confidence),
                    summary: Some(parsed.summary),
                    duration_ms,
                    error: None,
                },
                None => error_slot(
                    &choice,
                    "Could not parse structured response from model",
                    duration_ms,
                ),
            }
        }
        Err(e) => error_slot(&choice, &e.to_string(), elapsed_ms(&started)),
    }
}

/// Fan the same analysis prompt out to up to four providers at once.
///
/// Each call runs under a 30 s deadline inside a 35 s overall deadline;
/// slots that exceed either report `Request timed out` while the others'
/// results are unaffected. Results always come back in request order.
/// Persistence happens on a background task and never blocks the response.
pub async fn run_sync_compare(
    pool: &SqlitePool,
    config: &Config,
    req: CompareRequest,
) -> Result<CompareResponse, AppError> {
    let ticker = req.ticker.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(AppError::Validation("ticker is required".to_string()));
    }
    if req.providers.is_empty() {
        return Err(AppError::Validation(
            "providers must be a non-empty array".to_string(),
        ));
    }
    if req.providers.len() > MAX_PROVIDERS {
        return Err(AppError::Validation(format!(
            "at most {MAX_PROVIDERS} providers per request"
        )));
    }
    for choice in &req.providers {
        if choice.provider.trim().is_empty() {
            return Err(AppError::Validation(
                "each provider entry must have a \"provider\" field".to_string(),
            ));
        }
    }

    let ctx = rating_queries::market_context(pool, &ticker).await;
    let prompt = build_analysis_prompt(&ticker, &ctx);
    let run_id = Uuid::new_v4().to_string();

    // One task per provider; each slot resolves within the per-call deadline.
    let mut handles: Vec<tokio::task::JoinHandle<CompareResult>> = req
        .providers
        .iter()
        .map(|choice| {
            let pool = pool.clone();
            let config = config.clone();
            let choice = choice.clone();
            let prompt = prompt.clone();
            tokio::spawn(async move {
                let fallback = choice.clone();
                match timeout(
                    PROVIDER_TIMEOUT,
                    call_one_provider(pool, config, choice, prompt),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => error_slot(
                        &fallback,
                        "Request timed out",
                        PROVIDER_TIMEOUT.as_millis() as i64,
                    ),
                }
            })
        })
        .collect();

    // The overall deadline is a backstop above the per-call deadline; if it
    // trips, unfinished tasks are aborted and their slots filled in order.
    let results: Vec<CompareResult> =
        match timeout(FANOUT_TIMEOUT, join_all(handles.iter_mut())).await {
            Ok(joined) => joined
                .into_iter()
                .zip(&req.providers)
                .map(|(res, choice)| {
                    res.unwrap_or_else(|_| error_slot(choice, "provider task failed", 0))
                })
                .collect(),
            Err(_) => {
                let mut out = Vec::with_capacity(handles.len());
                for (handle, choice) in handles.iter_mut().zip(&req.providers) {
                    handle.abort();
                    let slot = match handle.await {
                        Ok(result) => result,
                        Err(_) => error_slot(
                            choice,
                            "Request timed out",
                            FANOUT_TIMEOUT.as_millis() as i64,
                        ),
                    };
                    out.push(slot);
                }
                out
            }
        };

    // Persist asynchronously; errors are logged only.
    {
        let pool = pool.clone();
        let run_id = run_id.clone();
        let ticker = ticker.clone();
        let providers_json =
            serde_json::to_string(&req.providers.iter().map(|p| &p.provider).collect::<Vec<_>>())
                .unwrap_or_else(|_| "[]".to_string());
        let results = results.clone();
        tokio::spawn(async move {
            if let Err(e) =
                comparison_queries::persist_sync_run(&pool, &run_id, &ticker, &providers_json, &results)
                    .await
            {
                warn!("compare run {} persistence failed: {}", run_id, e);
            }
        });
    }

    Ok(CompareResponse {
        run_id,
        ticker,
        market_context: json!({
            "price": ctx.price,
            "rsi": ctx.rsi,
            "sentiment_score": ctx.sentiment_score,
        }),
        results,
    })
}

// ==============================================================================
// Asynchronous comparison runs
// ==============================================================================

/// Create a pending run row and launch the background fan-out. The poll
/// endpoint reads results as they land, so partial progress is visible.
pub async fn create_comparison_run(
    pool: &SqlitePool,
    config: &Config,
    req: CreateComparisonRunRequest,
) -> Result<String, AppError> {
    let prompt = req.prompt.clone().unwrap_or_default();
    let ticker = req
        .ticker
        .clone()
        .map(|t| t.trim().to_uppercase())
        .unwrap_or_default();
    if prompt.trim().is_empty() && ticker.is_empty() {
        return Err(AppError::Validation(
            "either prompt or ticker is required".to_string(),
        ));
    }
    let template = req.template.clone().unwrap_or_else(|| "custom".to_string());
    if !VALID_TEMPLATES.contains(&template.as_str()) {
        return Err(AppError::Validation(format!(
            "template must be one of {VALID_TEMPLATES:?}"
        )));
    }

    let run_id = Uuid::new_v4().to_string();
    comparison_queries::create_run(
        pool,
        &run_id,
        Some(prompt.as_str()).filter(|p| !p.is_empty()),
        Some(ticker.as_str()).filter(|t| !t.is_empty()),
        &template,
    )
    .await?;

    let pool = pool.clone();
    let config = config.clone();
    let run_id_bg = run_id.clone();
    tokio::spawn(async move {
        if timeout(
            ASYNC_RUN_TIMEOUT,
            execute_comparison_run(&pool, &config, &run_id_bg, req, prompt, ticker, template),
        )
        .await
        .is_err()
        {
            // Late completions after the deadline are discarded; the run is
            // closed out as complete with whatever results landed.
            warn!("comparison run {} hit the overall deadline", run_id_bg);
            let _ = comparison_queries::set_run_status(&pool, &run_id_bg, "complete").await;
        }
    });

    Ok(run_id)
}

#[allow(clippy::too_many_arguments)]
async fn execute_comparison_run(
    pool: &SqlitePool,
    config: &Config,
    run_id: &str,
    req: CreateComparisonRunRequest,
    prompt: String,
    ticker: String,
    template: String,
) {
    let mut candidates = match comparison_queries::configured_providers(pool).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("comparison run {}: provider query failed: {}", run_id, e);
            let _ = comparison_queries::set_run_status(pool, run_id, "error").await;
            return;
        }
    };

    if let Some(ids) = &req.provider_ids {
        candidates.retain(|p| ids.contains(&p.id));
    } else if let Some(names) = &req.provider_names {
        let names: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        candidates.retain(|p| names.contains(&p.provider_name.to_lowercase()));
    }

    if candidates.is_empty() {
        warn!("comparison run {}: no matching providers found", run_id);
        let _ = comparison_queries::set_run_status(pool, run_id, "error").await;
        return;
    }

    let effective_prompt = if prompt.trim().is_empty() {
        format!(
            "Analyze {ticker} stock. Respond ONLY with a JSON object — no other text: \
             {{\"rating\": \"BUY\", \"score\": 72, \"confidence\": 65, \"summary\": \"2-3 sentence analysis.\"}} \
             rating must be BUY, HOLD, or SELL; score and confidence are 0-100 integers."
        )
    } else {
        expand_template(pool, &template, &prompt, &ticker).await
    };

    // Insert each result the moment its provider completes.
    let mut in_flight: FuturesUnordered<_> = candidates
        .into_iter()
        .map(|prov| {
            let prompt = effective_prompt.clone();
            async move {
                let started = std::time::Instant::now();
                let outcome = match ProviderFactory::create(
                    &prov.provider_name,
                    prov.api_key.clone(),
                    prov.model.clone(),
                ) {
                    Ok(provider) => {
                        timeout(
                            PROVIDER_TIMEOUT,
                            provider.generate_analysis_with_usage(&prompt, ASYNC_MAX_TOKENS),
                        )
                        .await
                        .map_err(|_| crate::llm::providers::LlmError::Timeout)
                        .and_then(|r| r)
                    }
                    Err(e) => Err(e),
                };
                (prov, outcome, started.elapsed().as_millis() as i64)
            }
        })
        .collect();

    while let Some((prov, outcome, latency_ms)) = in_flight.next().await {
        let (text, tokens, error) = match outcome {
            Ok((text, tokens)) => (Some(text), tokens, None),
            Err(e) => (None, 0, Some(e.to_string())),
        };
        let parsed = text.as_deref().and_then(parse_structured_response);

        if let Err(e) = comparison_queries::insert_result(
            pool,
            run_id,
            &prov.provider_name,
            prov.model.as_deref(),
            text.as_deref(),
            tokens,
            latency_ms,
            error.as_deref(),
            parsed.as_ref(),
        )
        .await
        {
            warn!("comparison run {}: result insert failed: {}", run_id, e);
        }
    }

    if let Err(e) = comparison_queries::set_run_status(pool, run_id, "complete").await {
        warn!("comparison run {}: status update failed: {}", run_id, e);
    } else {
        info!("comparison run {} complete", run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_all_tables;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();
        pool
    }

    fn bare_config() -> Config {
        Config::from_env()
    }

    #[tokio::test]
    async fn test_sync_compare_validation() {
        let pool = test_pool().await;
        let config = bare_config();

        let no_ticker = run_sync_compare(
            &pool,
            &config,
            CompareRequest {
                ticker: "  ".into(),
                providers: vec![ProviderChoice { provider: "openai".into(), model: None }],
            },
        )
        .await;
        assert!(matches!(no_ticker, Err(AppError::Validation(_))));

        let no_providers = run_sync_compare(
            &pool,
            &config,
            CompareRequest { ticker: "AAPL".into(), providers: vec![] },
        )
        .await;
        assert!(matches!(no_providers, Err(AppError::Validation(_))));

        let too_many = run_sync_compare(
            &pool,
            &config,
            CompareRequest {
                ticker: "AAPL".into(),
                providers: (0..5)
                    .map(|_| ProviderChoice { provider: "openai".into(), model: None })
                    .collect(),
            },
        )
        .await;
        assert!(matches!(too_many, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_sync_compare_unkeyed_providers_error_in_order() {
        let pool = test_pool().await;
        // No env keys and no DB keys: every slot reports a missing key, in
        // request order, without failing the run.
        let config = Config {
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
            google_ai_key: String::new(),
            xai_api_key: String::new(),
            ..bare_config()
        };

        let response = run_sync_compare(
            &pool,
            &config,
            CompareRequest {
                ticker: "aapl".into(),
                providers: vec![
                    ProviderChoice { provider: "grok".into(), model: None },
                    ProviderChoice { provider: "anthropic".into(), model: None },
                ],
            },
        )
        .await
        .unwrap();

        assert_eq!(response.ticker, "AAPL");
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].provider, "grok");
        assert_eq!(response.results[1].provider, "anthropic");
        assert!(response.results[0]
            .error
            .as_ref()
            .unwrap()
            .contains("No API key"));
    }

    #[tokio::test]
    async fn test_async_run_without_providers_marks_error() {
        let pool = test_pool().await;
        let config = bare_config();

        let run_id = create_comparison_run(
            &pool,
            &config,
            CreateComparisonRunRequest {
                prompt: Some("what do you think?".into()),
                ticker: Some("AAPL".into()),
                provider_ids: None,
                provider_names: None,
                template: Some("custom".into()),
            },
        )
        .await
        .unwrap();

        // Background task with zero configured providers flips to error.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let run = comparison_queries::get_run(&pool, &run_id).await.unwrap().unwrap();
        assert_eq!(run.status, "error");
    }

    #[tokio::test]
    async fn test_invalid_template_rejected() {
        let pool = test_pool().await;
        let config = bare_config();

        let result = create_comparison_run(
            &pool,
            &config,
            CreateComparisonRunRequest {
                prompt: Some("p".into()),
                ticker: None,
                provider_ids: None,
                provider_names: None,
                template: Some("haiku_mode".into()),
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_template_expansion_prepends_context() {
        let pool = test_pool().await;
        let expanded = expand_template(&pool, "risk_summary", "How risky?", "AAPL").await;
        assert!(expanded.contains("financial risk analyst"));
        assert!(expanded.contains("Ticker: AAPL"));
        assert!(expanded.contains("Analysis request: How risky?"));

        let custom = expand_template(&pool, "custom", "Raw prompt", "AAPL").await;
        assert_eq!(custom, "Raw prompt");
    }
}
