//! SQLite pool setup and embedded migrations

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::DatabaseConfig;
use crate::error::AppResult;

/// Open a pool with foreign keys enforced.
///
/// An in-memory database lives only as long as its connection, so it gets a
/// single connection that is never recycled.
pub async fn connect(config: &DatabaseConfig) -> AppResult<SqlitePool> {
    let in_memory = config.url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Apply the schema migrations bundled into the binary
pub async fn migrate(pool: &SqlitePool) -> AppResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
