use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Process-wide configuration, loaded once from the environment at startup
/// and shared through `AppState` / `JobContext`.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub port: u16,

    pub market_timezone: String,
    pub india_market_timezone: String,
    pub us_market_open: String,
    pub us_market_close: String,
    pub india_market_open: String,
    pub india_market_close: String,

    pub db_pool_size: u32,
    pub db_pool_timeout_secs: u64,
    pub db_busy_timeout_ms: u64,
    pub db_cache_size_kb: i64,

    pub price_refresh_interval_seconds: u64,
    pub price_refresh_workers: usize,
    pub ws_max_subscriptions_per_client: usize,
    pub ws_price_broadcast: bool,

    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub google_ai_key: String,
    pub xai_api_key: String,
    pub finnhub_api_key: String,
    pub alpha_vantage_key: String,
    pub polygon_api_key: String,
    pub github_token: String,
    /// (owner, name) pairs parsed from GITHUB_REPOS ("owner/name,owner/name").
    pub github_repos: Vec<(String, String)>,
}

impl Config {
    pub fn from_env() -> Self {
        let github_repos = env_or("GITHUB_REPOS", "")
            .split(',')
            .filter_map(|pair| {
                let mut parts = pair.trim().splitn(2, '/');
                match (parts.next(), parts.next()) {
                    (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
                        Some((owner.to_string(), name.to_string()))
                    }
                    _ => None,
                }
            })
            .collect();

        // PRICE_REFRESH_WORKERS should not exceed the pool size; a worker
        // without a connection just queues on acquire.
        let db_pool_size: u32 = env_parse("DB_POOL_SIZE", 5);
        let price_refresh_workers =
            env_parse::<usize>("PRICE_REFRESH_WORKERS", 4).min(db_pool_size as usize);

        Self {
            db_path: env_or("DB_PATH", "tickerpulse.db"),
            port: env_parse("PORT", 5001),

            market_timezone: env_or("MARKET_TIMEZONE", "America/New_York"),
            india_market_timezone: env_or("INDIA_MARKET_TIMEZONE", "Asia/Kolkata"),
            us_market_open: env_or("US_MARKET_OPEN", "09:30"),
            us_market_close: env_or("US_MARKET_CLOSE", "16:00"),
            india_market_open: env_or("INDIA_MARKET_OPEN", "09:15"),
            india_market_close: env_or("INDIA_MARKET_CLOSE", "15:30"),

            db_pool_size,
            db_pool_timeout_secs: env_parse("DB_POOL_TIMEOUT", 10),
            db_busy_timeout_ms: env_parse("DB_BUSY_TIMEOUT_MS", 5000),
            db_cache_size_kb: env_parse("DB_CACHE_SIZE_KB", 8192),

            price_refresh_interval_seconds: env_parse("PRICE_REFRESH_INTERVAL_SECONDS", 60),
            price_refresh_workers,
            ws_max_subscriptions_per_client: env_parse("WS_MAX_SUBSCRIPTIONS_PER_CLIENT", 50),
            ws_price_broadcast: env_or("WS_PRICE_BROADCAST", "true") != "false",

            anthropic_api_key: env_or("ANTHROPIC_API_KEY", ""),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            google_ai_key: env_or("GOOGLE_AI_KEY", ""),
            xai_api_key: env_or("XAI_API_KEY", ""),
            finnhub_api_key: env_or("FINNHUB_API_KEY", ""),
            alpha_vantage_key: env_or("ALPHA_VANTAGE_KEY", ""),
            polygon_api_key: env_or("POLYGON_API_KEY", ""),
            github_token: env_or("GITHUB_TOKEN", ""),
            github_repos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = Config::from_env();
        assert_eq!(config.db_pool_size, 5);
        assert_eq!(config.db_pool_timeout_secs, 10);
        assert_eq!(config.us_market_open, "09:30");
        assert_eq!(config.india_market_close, "15:30");
        assert!(config.ws_max_subscriptions_per_client > 0);
        assert!(config.port > 0);
    }

    #[test]
    fn test_workers_capped_by_pool_size() {
        let config = Config::from_env();
        assert!(config.price_refresh_workers <= config.db_pool_size as usize);
    }
}
