use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{agent_queries, comparison_queries};
use crate::errors::AppError;
use crate::llm::providers::{LlmProvider, ProviderFactory};
use crate::models::agent::{AgentCostSummary, AgentResult};

/// Frontend-visible stub ids routed to the five real agents. Real names
/// pass through unchanged. The map itself is part of the API surface.
pub const STUB_NAME_MAP: &[(&str, &str)] = &[
    ("sentiment_analyst", "investigator"),
    ("technical_analyst", "scanner"),
    ("risk_analyst", "regime"),
    ("report_generator", "reporter"),
    ("data_collector", "researcher"),
    ("market_analyst", "scanner"),
];

pub const REAL_AGENTS: &[&str] = &["investigator", "scanner", "regime", "reporter", "researcher"];

pub fn resolve_agent_name(name: &str) -> &str {
    STUB_NAME_MAP
        .iter()
        .find(|(stub, _)| *stub == name)
        .map(|(_, real)| *real)
        .unwrap_or(name)
}

// ==============================================================================
// Cost estimation
// ==============================================================================

/// (model prefix, input $/1M tokens, output $/1M tokens)
const MODEL_COSTS: &[(&str, f64, f64)] = &[
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-opus", 15.00, 75.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4", 30.00, 60.00),
    ("gemini-2.5-pro", 1.25, 10.00),
    ("gemini", 0.10, 0.40),
    ("grok", 2.00, 10.00),
];

const DEFAULT_COST_PER_M: (f64, f64) = (1.00, 3.00);

pub fn estimate_cost(model: &str, tokens_input: i64, tokens_output: i64) -> f64 {
    let (input_rate, output_rate) = MODEL_COSTS
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(DEFAULT_COST_PER_M);
    (tokens_input as f64 * input_rate + tokens_output as f64 * output_rate) / 1_000_000.0
}

// ==============================================================================
// Agent trait + builtin LLM-backed agents
// ==============================================================================

#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, inputs: &serde_json::Value) -> Result<AgentResult, AppError>;

    fn framework(&self) -> &'static str {
        "builtin"
    }
}

/// Agent backed by the first configured LLM provider, with a per-agent role
/// prompt. Token usage comes back as a vendor total; the input share is
/// approximated from the prompt length.
pub struct LlmBackedAgent {
    role_prompt: &'static str,
    provider: Arc<dyn LlmProvider>,
}

impl LlmBackedAgent {
    fn new(role_prompt: &'static str, provider: Arc<dyn LlmProvider>) -> Self {
        Self { role_prompt, provider }
    }
}

#[async_trait]
impl Agent for LlmBackedAgent {
    async fn run(&self, inputs: &serde_json::Value) -> Result<AgentResult, AppError> {
        let prompt = format!("{}\n\nInputs:\n{}", self.role_prompt, inputs);
        let (text, total_tokens) = self
            .provider
            .generate_analysis_with_usage(&prompt, 800)
            .await
            .map_err(|e| AppError::Provider(e.to_string()))?;

        let tokens_input = ((prompt.len() / 4) as i64).min(total_tokens);
        let tokens_output = (total_tokens - tokens_input).max(0);
        let output = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or_else(|_| json!({"text": text}));

        Ok(AgentResult {
            output,
            tokens_input,
            tokens_output,
            estimated_cost: estimate_cost(self.provider.model(), tokens_input, tokens_output),
        })
    }
}

const ROLE_PROMPTS: &[(&str, &str)] = &[
    (
        "scanner",
        "You are a technical analysis agent. Scan the given tickers for RSI, MACD, and \
         moving-average signals and report notable breakouts as JSON.",
    ),
    (
        "regime",
        "You are a market regime analyst. Classify the current market regime as one of \
         Bull, Bear, Neutral, or Volatile and justify briefly. Respond as JSON with a \
         'regime' field.",
    ),
    (
        "investigator",
        "You are a social sentiment investigator. Summarise trending retail-investor \
         discussion for the given tickers as a JSON list of {ticker, sentiment, mentions}.",
    ),
    (
        "researcher",
        "You are an equity research agent. Produce a concise research brief for the \
         given ticker covering catalysts, risks, and valuation.",
    ),
    (
        "reporter",
        "You are a portfolio reporting agent. Compose a readable digest from the given \
         market data, alerts, and job results.",
    ),
];

// ==============================================================================
// Registry
// ==============================================================================

pub struct AgentRegistry {
    pool: SqlitePool,
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Registry with no agents wired; tests register their own.
    pub fn empty(pool: SqlitePool) -> Self {
        Self {
            pool,
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, agent: Arc<dyn Agent>) {
        self.agents.insert(name.to_string(), agent);
    }

    /// Wire the five builtin agents against the first configured LLM
    /// provider. With no key configured the registry stays empty and every
    /// run records an error row instead of crashing the calling job.
    pub async fn from_config(pool: SqlitePool, config: &Config) -> Self {
        let mut registry = Self::empty(pool.clone());

        let provider = Self::first_configured_provider(&pool, config).await;
        let Some(provider) = provider else {
            warn!("no LLM provider configured; agents are disabled");
            return registry;
        };

        for (name, role_prompt) in ROLE_PROMPTS {
            registry.register(name, Arc::new(LlmBackedAgent::new(role_prompt, provider.clone())));
        }
        registry
    }

    async fn first_configured_provider(
        pool: &SqlitePool,
        config: &Config,
    ) -> Option<Arc<dyn LlmProvider>> {
        let candidates = [
            ("anthropic", config.anthropic_api_key.clone()),
            ("openai", config.openai_api_key.clone()),
            ("google", config.google_ai_key.clone()),
            ("grok", config.xai_api_key.clone()),
        ];
        for (name, key) in candidates {
            if !key.is_empty() {
                if let Ok(provider) = ProviderFactory::create(name, key, None) {
                    return Some(provider);
                }
            }
        }
        // Fall back to any provider the user configured through the API.
        if let Ok(rows) = comparison_queries::configured_providers(pool).await {
            for row in rows {
                if let Ok(provider) =
                    ProviderFactory::create(&row.provider_name, row.api_key, row.model)
                {
                    return Some(provider);
                }
            }
        }
        None
    }

    pub fn known_agents(&self) -> serde_json::Value {
        json!({
            "agents": REAL_AGENTS,
            "aliases": STUB_NAME_MAP
                .iter()
                .map(|(stub, real)| json!({"id": stub, "agent": real}))
                .collect::<Vec<_>>(),
        })
    }

    /// Execute an agent by (possibly stubbed) name, persisting an
    /// `agent_runs` row across the call. Returns the result plus the run id.
    pub async fn run(
        &self,
        name: &str,
        inputs: &serde_json::Value,
    ) -> Result<(AgentResult, i64), AppError> {
        let real_name = resolve_agent_name(name);
        let agent = self
            .agents
            .get(real_name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("agent {real_name}")))?;

        let input_json = inputs.to_string();
        let run_id =
            agent_queries::start_run(&self.pool, real_name, agent.framework(), &input_json).await?;
        let started = std::time::Instant::now();

        match agent.run(inputs).await {
            Ok(result) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                agent_queries::complete_run(
                    &self.pool,
                    run_id,
                    "completed",
                    Some(&result.output.to_string()),
                    result.tokens_input,
                    result.tokens_output,
                    result.estimated_cost,
                    duration_ms,
                    None,
                )
                .await?;
                info!(
                    "agent {} run {} completed in {}ms (${:.4})",
                    real_name, run_id, duration_ms, result.estimated_cost
                );
                Ok((result, run_id))
            }
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                agent_queries::complete_run(
                    &self.pool,
                    run_id,
                    "failed",
                    None,
                    0,
                    0,
                    0.0,
                    duration_ms,
                    Some(&e.to_string()),
                )
                .await?;
                warn!("agent {} run {} failed: {}", real_name, run_id, e);
                Err(e)
            }
        }
    }

    pub async fn cost_summary(&self, window_days: i64) -> Result<AgentCostSummary, AppError> {
        Ok(agent_queries::cost_summary(&self.pool, window_days).await?)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeAgent;
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

    #[test]
    fn test_stub_name_resolution() {
        assert_eq!(resolve_agent_name("sentiment_analyst"), "investigator");
        assert_eq!(resolve_agent_name("technical_analyst"), "scanner");
        assert_eq!(resolve_agent_name("market_analyst"), "scanner");
        // Real names pass through.
        assert_eq!(resolve_agent_name("regime"), "regime");
        assert_eq!(resolve_agent_name("unknown_agent"), "unknown_agent");
    }

    #[test]
    fn test_cost_estimation_uses_model_table() {
        // 1M input tokens of gpt-4o-mini is $0.15.
        let cost = estimate_cost("gpt-4o-mini", 1_000_000, 0);
        assert!((cost - 0.15).abs() < 1e-9);
        // Longest-prefix-ish ordering: gpt-4o-mini must not match gpt-4o.
        assert!(estimate_cost("gpt-4o-mini", 1_000_000, 0) < estimate_cost("gpt-4o", 1_000_000, 0));
        // Unknown models get the default rate.
        assert!(estimate_cost("mystery-model", 1_000_000, 0) > 0.0);
    }

    #[tokio::test]
    async fn test_run_persists_completed_row() {
        let pool = test_pool().await;
        let mut registry = AgentRegistry::empty(pool.clone());
        registry.register(
            "scanner",
            Arc::new(FakeAgent { output: serde_json::json!({"signals": []}), fail: false }),
        );

        let (result, run_id) = registry
            .run("technical_analyst", &serde_json::json!({"tickers": ["AAPL"]}))
            .await
            .unwrap();
        assert_eq!(result.tokens_input, 100);

        let run = agent_queries::get_run(&pool, run_id).await.unwrap().unwrap();
        assert_eq!(run.agent_name, "scanner");
        assert_eq!(run.status, "completed");
        assert_eq!(run.tokens_input, 100);
        assert_eq!(run.tokens_output, 50);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let pool = test_pool().await;
        let mut registry = AgentRegistry::empty(pool.clone());
        registry.register(
            "regime",
            Arc::new(FakeAgent { output: serde_json::Value::Null, fail: true }),
        );

        let err = registry.run("regime", &serde_json::json!({})).await;
        assert!(err.is_err());

        let runs = agent_queries::list_runs(&pool, Some("regime"), 1, 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "failed");
        assert!(runs[0].error.as_ref().unwrap().contains("fake agent failure"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let pool = test_pool().await;
        let registry = AgentRegistry::empty(pool);
        let result = registry.run("nonexistent", &serde_json::json!({})).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
