use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use crate::config::Config;

/// Open the embedded store with WAL journaling, a bounded pool, and the
/// pragmas the rest of the system assumes (busy_timeout, foreign keys,
/// page cache). Acquisitions waiting past the pool timeout fail with
/// `sqlx::Error::PoolTimedOut` rather than deadlocking.
pub async fn open_pool(config: &Config) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.db_path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.db_busy_timeout_ms))
        .foreign_keys(true)
        .pragma("cache_size", format!("-{}", config.db_cache_size_kb));

    SqlitePoolOptions::new()
        .max_connections(config.db_pool_size)
        .acquire_timeout(Duration::from_secs(config.db_pool_timeout_secs))
        .connect_with(options)
        .await
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub in_use: u32,
    pub available: u32,
}

pub fn pool_stats(pool: &SqlitePool) -> PoolStats {
    let size = pool.size();
    let idle = pool.num_idle() as u32;
    PoolStats {
        size,
        in_use: size.saturating_sub(idle),
        available: idle,
    }
}

// ==============================================================================
// Immediate transactions
// ==============================================================================

/// A `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// WAL lets readers proceed while a writer holds the file lock, but it does
/// not serialise two in-process read-modify-write sequences. Write paths that
/// must observe-then-update (settings, scheduler triggers) take the database
/// write lock up front via `BEGIN IMMEDIATE`, alongside a process-level mutex.
///
/// Dropping the guard without calling `commit()` rolls the transaction back
/// before the connection returns to the pool, so an early `?` in a caller
/// can never leak an open write transaction.
pub struct ImmediateTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTx {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        self.conn.as_mut().expect("transaction already finished")
    }

    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        let mut conn = self.conn.take().expect("transaction already finished");
        sqlx::query("COMMIT").execute(&mut *conn).await?;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        let mut conn = self.conn.take().expect("transaction already finished");
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        Ok(())
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            tokio::spawn(async move {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            });
        }
    }
}
