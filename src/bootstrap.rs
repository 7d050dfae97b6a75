//! Startup sequence and exit-code decision.
//!
//! SYSTEM CONTEXT
//! ==============
//! `main` calls [`run`] once. Stages run strictly in order and the first
//! failure stops the rest:
//!
//! config -> pool open -> UI server build -> start -> middleware -> listen
//!
//! Every stage error comes back here as a [`StartupError`]; this is the only
//! place that logs it and picks the exit code. Once the pool is open it is
//! closed exactly once, whichever stage fails.

use std::ffi::OsString;
use std::future::Future;

use crate::app::{AppError, AppServerFactory, HandlerOpts, QueueClient};
use crate::config::{Config, ConfigError};
use crate::db::{PoolError, PoolFactory};
use crate::middleware;
use crate::server::{self, ServeError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] PoolError),
    #[error(transparent)]
    Construction(#[from] AppError),
    #[error(transparent)]
    Listener(#[from] ServeError),
}

impl StartupError {
    /// `0` only for `--help`/`--version` output; everything else is `1`.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(ConfigError::Args(e)) if !e.use_stderr() => 0,
            _ => 1,
        }
    }

    /// Log with the structured context for the failing stage.
    pub fn report(&self) {
        match self {
            Self::Config(ConfigError::Args(e)) => {
                if let Err(print_err) = e.print() {
                    tracing::error!(error = %print_err, "failed to print usage");
                }
            }
            Self::Config(ConfigError::InvalidPrefix { prefix }) => {
                tracing::error!(%prefix, "invalid path prefix");
            }
            Self::Config(ConfigError::MissingEnv { name }) => {
                tracing::error!(%name, "missing required env var");
            }
            Self::Connection(e) => tracing::error!(error = %e, "error connecting to db"),
            Self::Construction(AppError::Construct(e)) => tracing::error!(error = %e, "error creating handler"),
            Self::Construction(AppError::Start(e)) => tracing::error!(error = %e, "error starting UI server"),
            Self::Listener(e) => tracing::error!(error = %e, "server stopped unexpectedly"),
        }
    }
}

/// Run the whole startup sequence and serve until `shutdown` resolves.
/// Returns the process exit code.
pub async fn run<I, T, F, S>(
    args: I,
    env: F,
    pools: &dyn PoolFactory,
    servers: &dyn AppServerFactory,
    shutdown: S,
) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
    F: Fn(&str) -> Option<String>,
    S: Future<Output = ()>,
{
    match init_and_serve(args, env, pools, servers, shutdown).await {
        Ok(()) => 0,
        Err(err) => {
            err.report();
            err.exit_code()
        }
    }
}

/// # Errors
///
/// Returns the first stage failure. The pool, if opened, is already closed.
pub async fn init_and_serve<I, T, F, S>(
    args: I,
    env: F,
    pools: &dyn PoolFactory,
    servers: &dyn AppServerFactory,
    shutdown: S,
) -> Result<(), StartupError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
    F: Fn(&str) -> Option<String>,
    S: Future<Output = ()>,
{
    let config = Config::resolve(args, env)?;
    tracing::debug!(?config, "configuration resolved");

    let pool = pools.open(&config.database_url, config.db_max_connections).await?;
    let result = serve_with_pool(&config, pool.clone(), servers, shutdown).await;
    pools.close(pool).await;

    result
}

async fn serve_with_pool<S>(
    config: &Config,
    pool: sqlx::PgPool,
    servers: &dyn AppServerFactory,
    shutdown: S,
) -> Result<(), StartupError>
where
    S: Future<Output = ()>,
{
    let opts = HandlerOpts {
        client: QueueClient::new(pool.clone()),
        pool,
        logger: tracing::info_span!("ui_server", prefix = %config.path_prefix),
        prefix: config.path_prefix.clone(),
        basic_auth_user: config.basic_auth_user.clone(),
        basic_auth_password: config.basic_auth_password.clone(),
    };

    let ui_server = servers.build(opts)?;
    ui_server.start().await?;

    let handler = middleware::compose(ui_server.handler(), config);
    server::run(handler, &config.port, shutdown).await?;

    Ok(())
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;
