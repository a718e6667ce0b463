//! Pool construction and schema migration.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::MetaResult;

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Connect a pool suitable for the metadata stores, creating the
/// database file if needed.
pub async fn connect(database_url: &str, max_connections: u32) -> MetaResult<Arc<SqlitePool>> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(Arc::new(pool))
}

/// Apply the embedded schema, statement by statement.
pub async fn migrate(pool: &SqlitePool) -> MetaResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty());
    for statement in statements {
        tracing::debug!(statement, "applying migration statement");
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
