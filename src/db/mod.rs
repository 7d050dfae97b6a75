//! Database connection pool lifecycle.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup opens exactly one `PostgreSQL` pool after configuration resolves and
//! hands it to the UI server. The pool is closed through the same
//! [`PoolFactory`] on every exit path once it has been opened.

use std::str::FromStr;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("error parsing db config: {0}")]
    Parse(#[source] sqlx::Error),
    #[error("error connecting to db: {0}")]
    Open(#[source] sqlx::Error),
}

/// Opens and releases the process-wide connection pool.
#[async_trait::async_trait]
pub trait PoolFactory: Send + Sync {
    /// Parse `database_url` and open a pool against it.
    async fn open(&self, database_url: &str, max_connections: u32) -> Result<PgPool, PoolError>;

    /// Release the pool. Called once per successful [`PoolFactory::open`].
    async fn close(&self, pool: PgPool) {
        pool.close().await;
    }
}

/// Production factory backed by `sqlx`.
pub struct PgPoolFactory;

#[async_trait::async_trait]
impl PoolFactory for PgPoolFactory {
    async fn open(&self, database_url: &str, max_connections: u32) -> Result<PgPool, PoolError> {
        open_pool(database_url, max_connections).await
    }
}

/// Parse a connection string into pool connect options.
///
/// # Errors
///
/// Returns [`PoolError::Parse`] if the URL is malformed.
pub fn parse_options(database_url: &str) -> Result<PgConnectOptions, PoolError> {
    PgConnectOptions::from_str(database_url).map_err(PoolError::Parse)
}

/// Initialize the `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns an error if the URL does not parse or the first connection fails.
pub async fn open_pool(database_url: &str, max_connections: u32) -> Result<PgPool, PoolError> {
    let options = parse_options(database_url)?;
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(PoolError::Open)?;

    tracing::debug!(max_connections, "database pool opened");
    Ok(pool)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
