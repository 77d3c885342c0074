//! Database pool setup and migrations.

use crate::config::DatabaseConfig;
use crate::error::{DbError, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr as _;
use std::time::Duration;

/// Open the pool described by `config` and bring the schema up to date.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let in_memory = config.url.contains(":memory:");

    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(DbError::from)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10));
    let max_connections = if in_memory {
        // The database lives only as long as a connection to it does: keep a
        // single connection open for the life of the pool.
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        1
    } else {
        config.max_connections
    };

    let pool = pool_options
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(DbError::from)?;

    migrate(&pool).await?;

    tracing::info!(url = %config.url, max_connections, "database ready");
    Ok(pool)
}

/// Apply embedded migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DbError::from)?;
    Ok(())
}

/// Fresh migrated in-memory database for tests.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    connect(&DatabaseConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
    })
    .await
    .expect("in-memory database")
}

/// True when `error` is a UNIQUE constraint violation.
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
        _ => false,
    }
}

/// True when `error` is a FOREIGN KEY constraint violation.
pub fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_foreign_key_violation(),
        _ => false,
    }
}
