use crate::models::earnings::{EarningsEvent, EarningsUpsert};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Batch-upsert earnings rows keyed on (ticker, earnings_date).
///
/// COALESCE keeps existing actuals when the incoming row carries null —
/// providers drop actuals from future events they previously reported.
pub async fn upsert_events(
    pool: &SqlitePool,
    events: &[EarningsUpsert],
) -> Result<u64, sqlx::Error> {
    if events.is_empty() {
        return Ok(0);
    }

    let now = Utc::now().to_rfc3339();
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO earnings_events \
         (ticker, company, earnings_date, time_of_day, eps_estimate, eps_actual, \
          revenue_estimate, revenue_actual, fiscal_quarter, updated_at) ",
    );
    builder.push_values(events, |mut b, e| {
        b.push_bind(&e.ticker)
            .push_bind(&e.company)
            .push_bind(&e.earnings_date)
            .push_bind(&e.time_of_day)
            .push_bind(e.eps_estimate)
            .push_bind(e.eps_actual)
            .push_bind(e.revenue_estimate)
            .push_bind(e.revenue_actual)
            .push_bind(&e.fiscal_quarter)
            .push_bind(&now);
    });
    builder.push(
        " ON CONFLICT(ticker, earnings_date) DO UPDATE SET \
           company = COALESCE(excluded.company, earnings_events.company), \
           time_of_day = COALESCE(excluded.time_of_day, earnings_events.time_of_day), \
           eps_estimate = COALESCE(excluded.eps_estimate, earnings_events.eps_estimate), \
           eps_actual = COALESCE(excluded.eps_actual, earnings_events.eps_actual), \
           revenue_estimate = COALESCE(excluded.revenue_estimate, earnings_events.revenue_estimate), \
           revenue_actual = COALESCE(excluded.revenue_actual, earnings_events.revenue_actual), \
           fiscal_quarter = COALESCE(excluded.fiscal_quarter, earnings_events.fiscal_quarter), \
           updated_at = excluded.updated_at",
    );

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn upcoming(pool: &SqlitePool, limit: i64) -> Result<Vec<EarningsEvent>, sqlx::Error> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    sqlx::query_as::<_, EarningsEvent>(
        "SELECT * FROM earnings_events WHERE earnings_date >= ? \
         ORDER BY earnings_date ASC LIMIT ?",
    )
    .bind(today)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn past(pool: &SqlitePool, limit: i64) -> Result<Vec<EarningsEvent>, sqlx::Error> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    sqlx::query_as::<_, EarningsEvent>(
        "SELECT * FROM earnings_events WHERE earnings_date < ? \
         ORDER BY earnings_date DESC LIMIT ?",
    )
    .bind(today)
    .bind(limit)
    .fetch_all(pool)
    .await
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

    fn event(ticker: &str, date: &str, eps_actual: Option<f64>) -> EarningsUpsert {
        EarningsUpsert {
            ticker: ticker.to_string(),
            company: Some("Test Co".to_string()),
            earnings_date: date.to_string(),
            time_of_day: Some("amc".to_string()),
            eps_estimate: Some(1.5),
            eps_actual,
            revenue_estimate: Some(1_000_000.0),
            revenue_actual: None,
            fiscal_quarter: Some("Q2".to_string()),
        }
    }

    #[tokio::test]
    async fn test_null_actual_preserves_stored_value() {
        let pool = test_pool().await;

        upsert_events(&pool, &[event("AAPL", "2026-05-01", Some(1.62))])
            .await
            .unwrap();
        // Provider re-sync without the actual must not erase it.
        upsert_events(&pool, &[event("AAPL", "2026-05-01", None)])
            .await
            .unwrap();

        let (actual,): (Option<f64>,) = sqlx::query_as(
            "SELECT eps_actual FROM earnings_events WHERE ticker = 'AAPL' AND earnings_date = '2026-05-01'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(actual, Some(1.62));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM earnings_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
