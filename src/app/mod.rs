//! UI server boundary.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup constructs exactly one UI server through an [`AppServerFactory`],
//! runs its [`AppServer::start`] warm-up, then takes its router as the
//! innermost handler of the middleware chain. Routing and queue semantics
//! live behind this boundary; [`console::ConsoleServer`] is the built-in
//! implementation the binary ships with.

pub mod auth;
pub mod console;

use axum::Router;
use sqlx::PgPool;

pub use console::ConsoleServerFactory;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("error creating handler: {0}")]
    Construct(String),
    #[error("error starting UI server: {0}")]
    Start(#[source] sqlx::Error),
}

// =============================================================================
// QUEUE CLIENT
// =============================================================================

/// Handle to the job queue, sharing the process pool.
#[derive(Clone, Debug)]
pub struct QueueClient {
    pool: PgPool,
}

impl QueueClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Round-trip to the database backing the queue.
    ///
    /// # Errors
    ///
    /// Returns the driver error if no connection can be acquired.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// SERVER CONTRACT
// =============================================================================

/// Everything a UI server needs at construction time.
pub struct HandlerOpts {
    pub pool: PgPool,
    pub client: QueueClient,
    /// Parent span for the server's own log events.
    pub logger: tracing::Span,
    pub prefix: String,
    pub basic_auth_user: String,
    pub basic_auth_password: String,
}

/// A constructed UI server.
#[async_trait::async_trait]
pub trait AppServer: Send + Sync {
    /// Warm-up that must succeed before traffic is accepted.
    async fn start(&self) -> Result<(), AppError>;

    /// Router serving the UI and API under the configured prefix.
    fn handler(&self) -> Router;
}

/// Builds the UI server from resolved options.
pub trait AppServerFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AppError::Construct`] when the options are unusable.
    fn build(&self, opts: HandlerOpts) -> Result<Box<dyn AppServer>, AppError>;
}
