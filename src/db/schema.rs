use sqlx::{Row, SqlitePool};
use tracing::info;

// ==============================================================================
// Table definitions
// ==============================================================================

const TABLES_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS news (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker          TEXT NOT NULL,
        title           TEXT NOT NULL,
        description     TEXT,
        url             TEXT UNIQUE,
        source          TEXT,
        published_date  TEXT,
        sentiment_score REAL,
        sentiment_label TEXT,
        engagement_score REAL DEFAULT 0,
        created_at      TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stocks (
        ticker   TEXT PRIMARY KEY,
        name     TEXT,
        market   TEXT DEFAULT 'US',
        added_at TEXT DEFAULT (datetime('now')),
        active   INTEGER DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key        TEXT PRIMARY KEY,
        value      TEXT,
        updated_at TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_providers (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_name TEXT NOT NULL,
        api_key       TEXT NOT NULL,
        model         TEXT,
        is_active     INTEGER DEFAULT 0,
        created_at    TEXT DEFAULT (datetime('now')),
        updated_at    TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_runs (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_name      TEXT NOT NULL,
        framework       TEXT NOT NULL DEFAULT 'builtin',
        status          TEXT NOT NULL DEFAULT 'pending',
        input_data      TEXT,
        output_data     TEXT,
        tokens_input    INTEGER DEFAULT 0,
        tokens_output   INTEGER DEFAULT 0,
        estimated_cost  REAL    DEFAULT 0.0,
        duration_ms     INTEGER DEFAULT 0,
        error           TEXT,
        metadata        TEXT,
        started_at      TEXT,
        completed_at    TEXT,
        created_at      TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_history (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id          TEXT NOT NULL,
        job_name        TEXT NOT NULL,
        status          TEXT NOT NULL DEFAULT 'pending',
        result_summary  TEXT,
        agent_name      TEXT,
        duration_ms     INTEGER DEFAULT 0,
        cost            REAL    DEFAULT 0.0,
        executed_at     TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_providers_config (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_name         TEXT NOT NULL UNIQUE,
        api_key               TEXT DEFAULT '',
        is_active             INTEGER DEFAULT 1,
        is_primary            INTEGER DEFAULT 0,
        priority              INTEGER DEFAULT 100,
        rate_limit_remaining  INTEGER DEFAULT -1,
        last_used             TEXT,
        created_at            TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_ratings (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker          TEXT NOT NULL UNIQUE,
        rating          TEXT NOT NULL DEFAULT 'HOLD',
        score           REAL NOT NULL DEFAULT 0,
        confidence      REAL NOT NULL DEFAULT 0,
        current_price   REAL,
        price_change    REAL,
        price_change_pct REAL,
        rsi             REAL,
        sentiment_score REAL,
        sentiment_label TEXT,
        technical_score REAL,
        fundamental_score REAL,
        summary         TEXT,
        updated_at      TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS watchlists (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        name       TEXT NOT NULL UNIQUE,
        sort_order INTEGER NOT NULL DEFAULT 0,
        created_at TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS watchlist_stocks (
        watchlist_id INTEGER NOT NULL REFERENCES watchlists(id) ON DELETE CASCADE,
        ticker       TEXT NOT NULL REFERENCES stocks(ticker),
        sort_order   INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (watchlist_id, ticker)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_alerts (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker            TEXT NOT NULL,
        condition_type    TEXT NOT NULL,
        threshold         REAL NOT NULL,
        enabled           INTEGER NOT NULL DEFAULT 1,
        sound_type        TEXT NOT NULL DEFAULT 'default',
        triggered_at      TEXT,
        notification_sent INTEGER NOT NULL DEFAULT 0,
        fired_at          TEXT DEFAULT NULL,
        fire_count        INTEGER NOT NULL DEFAULT 0,
        created_at        TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sentiment_cache (
        ticker          TEXT PRIMARY KEY,
        score           REAL NOT NULL,
        label           TEXT NOT NULL,
        signal_count    INTEGER NOT NULL,
        sources         TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS earnings_events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker           TEXT NOT NULL,
        company          TEXT,
        earnings_date    TEXT NOT NULL,
        time_of_day      TEXT,
        eps_estimate     REAL,
        eps_actual       REAL,
        revenue_estimate REAL,
        revenue_actual   REAL,
        fiscal_quarter   TEXT,
        fetched_at       TEXT DEFAULT (datetime('now')),
        updated_at       TEXT DEFAULT (datetime('now')),
        UNIQUE(ticker, earnings_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS error_log (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        source     TEXT NOT NULL,
        error_code TEXT,
        message    TEXT NOT NULL,
        stack      TEXT,
        request_id TEXT,
        context    TEXT,
        severity   TEXT NOT NULL DEFAULT 'error',
        session_id TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS download_stats (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_owner      TEXT NOT NULL,
        repo_name       TEXT NOT NULL,
        total_clones    INTEGER DEFAULT 0,
        unique_clones   INTEGER DEFAULT 0,
        period_start    TEXT,
        period_end      TEXT,
        recorded_at     TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS download_daily (
        repo_owner      TEXT NOT NULL,
        repo_name       TEXT NOT NULL,
        date            TEXT NOT NULL,
        clones          INTEGER DEFAULT 0,
        unique_clones   INTEGER DEFAULT 0,
        PRIMARY KEY (repo_owner, repo_name, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS perf_snapshots (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        cpu_pct         REAL,
        mem_pct         REAL,
        db_pool_in_use  INTEGER,
        db_pool_idle    INTEGER,
        recorded_at     TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_request_log (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        endpoint     TEXT NOT NULL,
        method       TEXT NOT NULL,
        status_class TEXT NOT NULL,
        call_count   INTEGER NOT NULL DEFAULT 0,
        p95_ms       REAL,
        avg_ms       REAL,
        log_date     TEXT NOT NULL,
        UNIQUE(endpoint, method, status_class, log_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS performance_metrics (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        source       TEXT NOT NULL,
        source_id    TEXT NOT NULL,
        metric_name  TEXT NOT NULL,
        metric_value REAL NOT NULL,
        tags         TEXT,
        recorded_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comparison_runs (
        id         TEXT PRIMARY KEY,
        prompt     TEXT,
        ticker     TEXT,
        status     TEXT NOT NULL DEFAULT 'pending',
        template   TEXT DEFAULT 'custom',
        created_at TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comparison_results (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id               TEXT NOT NULL REFERENCES comparison_runs(id),
        provider_name        TEXT NOT NULL,
        model                TEXT,
        response             TEXT,
        tokens_used          INTEGER DEFAULT 0,
        latency_ms           INTEGER DEFAULT 0,
        error                TEXT,
        extracted_rating     TEXT,
        extracted_score      INTEGER,
        extracted_confidence INTEGER,
        extracted_summary    TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_comparison_runs (
        id         TEXT PRIMARY KEY,
        ticker     TEXT NOT NULL,
        providers  TEXT,
        created_at TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_comparison_results (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id      TEXT NOT NULL,
        provider    TEXT,
        model       TEXT,
        rating      TEXT,
        score       INTEGER,
        confidence  INTEGER,
        summary     TEXT,
        duration_ms INTEGER DEFAULT 0,
        error       TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scheduler_jobs (
        job_id       TEXT PRIMARY KEY,
        trigger_type TEXT NOT NULL,
        trigger_args TEXT NOT NULL,
        enabled      INTEGER NOT NULL DEFAULT 1,
        updated_at   TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_schedules (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id       TEXT NOT NULL,
        trigger_type TEXT NOT NULL,
        trigger_args TEXT NOT NULL,
        enabled      INTEGER NOT NULL DEFAULT 1,
        created_at   TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ui_state (
        key        TEXT PRIMARY KEY,
        value      TEXT,
        updated_at TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS portfolio_positions (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker     TEXT NOT NULL,
        quantity   REAL NOT NULL,
        cost_basis REAL NOT NULL DEFAULT 0,
        created_at TEXT DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS portfolio_snapshots (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_date TEXT NOT NULL,
        total_value   REAL NOT NULL,
        total_cost    REAL NOT NULL,
        positions     TEXT,
        created_at    TEXT DEFAULT (datetime('now'))
    )
    "#,
];

const INDEXES_SQL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_agent_runs_status      ON agent_runs (status)",
    "CREATE INDEX IF NOT EXISTS idx_agent_runs_agent       ON agent_runs (agent_name)",
    "CREATE INDEX IF NOT EXISTS idx_agent_runs_started     ON agent_runs (started_at)",
    "CREATE INDEX IF NOT EXISTS idx_job_history_job_id     ON job_history (job_id)",
    "CREATE INDEX IF NOT EXISTS idx_job_history_executed   ON job_history (executed_at)",
    "CREATE INDEX IF NOT EXISTS idx_ai_ratings_ticker      ON ai_ratings (ticker)",
    "CREATE INDEX IF NOT EXISTS idx_news_ticker            ON news (ticker)",
    "CREATE INDEX IF NOT EXISTS idx_news_created           ON news (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_watchlist_stocks_wl    ON watchlist_stocks (watchlist_id)",
    "CREATE INDEX IF NOT EXISTS idx_watchlist_stocks_tk    ON watchlist_stocks (ticker)",
    "CREATE INDEX IF NOT EXISTS idx_watchlists_sort_order  ON watchlists (sort_order)",
    "CREATE INDEX IF NOT EXISTS idx_price_alerts_enabled   ON price_alerts (enabled, ticker)",
    "CREATE INDEX IF NOT EXISTS idx_earnings_date          ON earnings_events (earnings_date)",
    "CREATE INDEX IF NOT EXISTS idx_earnings_ticker        ON earnings_events (ticker)",
    "CREATE INDEX IF NOT EXISTS idx_error_log_created      ON error_log (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_error_log_source       ON error_log (source)",
    "CREATE INDEX IF NOT EXISTS idx_perf_snapshots_at      ON perf_snapshots (recorded_at)",
    "CREATE INDEX IF NOT EXISTS idx_perf_metrics_source    ON performance_metrics (source, source_id)",
    "CREATE INDEX IF NOT EXISTS idx_comparison_results_run ON comparison_results (run_id)",
    "CREATE INDEX IF NOT EXISTS idx_download_daily_date    ON download_daily (date)",
];

// ==============================================================================
// Migrations (additive, idempotent)
// ==============================================================================

async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect())
}

async fn add_missing_columns(
    pool: &SqlitePool,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<(), sqlx::Error> {
    let existing = table_columns(pool, table).await?;
    if existing.is_empty() {
        // Table does not exist yet; CREATE TABLE carries the full shape.
        return Ok(());
    }
    for (name, definition) in columns {
        if !existing.iter().any(|c| c == name) {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, definition);
            sqlx::query(&sql).execute(pool).await?;
            info!("migration applied: {}", sql);
        }
    }
    Ok(())
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    add_missing_columns(
        pool,
        "agent_runs",
        &[
            ("tokens_input", "INTEGER DEFAULT 0"),
            ("tokens_output", "INTEGER DEFAULT 0"),
            ("error", "TEXT"),
            ("metadata", "TEXT"),
        ],
    )
    .await?;

    add_missing_columns(pool, "news", &[("engagement_score", "REAL DEFAULT 0")]).await?;

    add_missing_columns(
        pool,
        "watchlists",
        &[("sort_order", "INTEGER NOT NULL DEFAULT 0")],
    )
    .await?;

    add_missing_columns(
        pool,
        "price_alerts",
        &[
            ("notification_sent", "INTEGER NOT NULL DEFAULT 0"),
            ("fired_at", "TEXT DEFAULT NULL"),
            ("fire_count", "INTEGER NOT NULL DEFAULT 0"),
            ("sound_type", "TEXT NOT NULL DEFAULT 'default'"),
        ],
    )
    .await?;

    add_missing_columns(
        pool,
        "ai_ratings",
        &[
            ("current_price", "REAL"),
            ("price_change", "REAL"),
            ("price_change_pct", "REAL"),
        ],
    )
    .await?;

    add_missing_columns(
        pool,
        "data_providers_config",
        &[
            ("rate_limit_used", "INTEGER DEFAULT 0"),
            ("rate_limit_max", "INTEGER DEFAULT -1"),
            ("reset_at", "TEXT"),
        ],
    )
    .await?;

    add_missing_columns(
        pool,
        "earnings_events",
        &[
            ("eps_actual", "REAL"),
            ("revenue_estimate", "REAL"),
            ("revenue_actual", "REAL"),
            ("updated_at", "TEXT DEFAULT (datetime('now'))"),
        ],
    )
    .await?;

    add_missing_columns(pool, "error_log", &[("session_id", "TEXT")]).await?;

    Ok(())
}

// ==============================================================================
// Public initialisation
// ==============================================================================

/// Create every table and index, then run the additive migration pass.
///
/// Safe to call multiple times: all statements are `IF NOT EXISTS` and
/// migrations only add columns that are missing. A default watchlist is
/// seeded so at least one always exists.
pub async fn init_all_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Migrate existing tables first so CREATE TABLE (a no-op on existing
    // tables) never masks a missing column.
    run_migrations(pool).await?;

    for sql in TABLES_SQL {
        sqlx::query(sql).execute(pool).await?;
    }

    for sql in INDEXES_SQL {
        sqlx::query(sql).execute(pool).await?;
    }

    sqlx::query("INSERT OR IGNORE INTO watchlists (id, name) VALUES (1, 'My Watchlist')")
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT OR IGNORE INTO watchlist_stocks (watchlist_id, ticker) \
         SELECT 1, ticker FROM stocks WHERE active = 1",
    )
    .execute(pool)
    .await?;

    info!("database tables and indexes initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let pool = memory_pool().await;
        init_all_tables(&pool).await.unwrap();
        init_all_tables(&pool).await.unwrap();

        let cols = table_columns(&pool, "ai_ratings").await.unwrap();
        assert!(cols.contains(&"current_price".to_string()));
        assert!(cols.contains(&"price_change_pct".to_string()));
        assert_eq!(
            cols.iter().filter(|c| c.as_str() == "current_price").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_migration_adds_missing_price_columns() {
        let pool = memory_pool().await;

        // Simulate a pre-price-columns database.
        sqlx::query(
            "CREATE TABLE ai_ratings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL UNIQUE,
                rating TEXT NOT NULL DEFAULT 'HOLD',
                score REAL NOT NULL DEFAULT 0,
                confidence REAL NOT NULL DEFAULT 0,
                updated_at TEXT DEFAULT (datetime('now'))
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO ai_ratings (ticker, rating, score) VALUES ('AAPL', 'BUY', 80)")
            .execute(&pool)
            .await
            .unwrap();

        init_all_tables(&pool).await.unwrap();

        let cols = table_columns(&pool, "ai_ratings").await.unwrap();
        assert!(cols.contains(&"current_price".to_string()));
        assert!(cols.contains(&"price_change".to_string()));
        assert!(cols.contains(&"price_change_pct".to_string()));

        // Existing rows survive the migration untouched.
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ai_ratings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let (rating,): (String,) =
            sqlx::query_as("SELECT rating FROM ai_ratings WHERE ticker = 'AAPL'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(rating, "BUY");
    }

    #[tokio::test]
    async fn test_default_watchlist_seeded() {
        let pool = memory_pool().await;
        init_all_tables(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlists")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
