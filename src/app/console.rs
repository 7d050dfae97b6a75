//! Built-in console server.
//!
//! DESIGN
//! ======
//! Serves the health-check API under the configured path prefix and guards
//! it with basic auth when credentials are configured. `start` is the
//! readiness check: one round-trip through the pool before traffic flows.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Serialize;
use sqlx::PgPool;
use tracing::Instrument;

use super::auth::{BasicAuth, require_basic_auth};
use super::{AppError, AppServer, AppServerFactory, HandlerOpts, QueueClient};

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
}

pub struct ConsoleServer {
    pool: PgPool,
    client: QueueClient,
    logger: tracing::Span,
    prefix: String,
    auth: Option<BasicAuth>,
}

impl ConsoleServer {
    /// # Errors
    ///
    /// Returns [`AppError::Construct`] for a half-configured basic auth pair
    /// or a prefix that does not start with `/`.
    pub fn new(opts: HandlerOpts) -> Result<Self, AppError> {
        if !opts.prefix.starts_with('/') {
            return Err(AppError::Construct(format!("invalid prefix {:?}", opts.prefix)));
        }
        let auth = BasicAuth::from_parts(&opts.basic_auth_user, &opts.basic_auth_password)?;

        Ok(Self { pool: opts.pool, client: opts.client, logger: opts.logger, prefix: opts.prefix, auth })
    }
}

#[async_trait::async_trait]
impl AppServer for ConsoleServer {
    async fn start(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(self.logger.clone())
            .await
            .map_err(AppError::Start)?;

        tracing::debug!(parent: &self.logger, basic_auth = self.auth.is_some(), "console server ready");
        Ok(())
    }

    fn handler(&self) -> Router {
        let api = Router::new()
            .route("/api/health-checks/{name}", get(health_check))
            .with_state(self.client.clone());

        let api = match &self.auth {
            Some(auth) => api.layer(middleware::from_fn_with_state(auth.clone(), require_basic_auth)),
            None => api,
        };

        mount(&self.prefix, api)
    }
}

/// Default factory used by the binary.
pub struct ConsoleServerFactory;

impl AppServerFactory for ConsoleServerFactory {
    fn build(&self, opts: HandlerOpts) -> Result<Box<dyn AppServer>, AppError> {
        Ok(Box::new(ConsoleServer::new(opts)?))
    }
}

/// Nest under `prefix`; the root prefix mounts the routes directly.
fn mount(prefix: &str, routes: Router) -> Router {
    if prefix == "/" {
        routes
    } else {
        Router::new().nest(prefix, routes)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET {prefix}/api/health-checks/{name}`, where name is `minimal` or `complete`.
async fn health_check(State(client): State<QueueClient>, Path(name): Path<String>) -> Response {
    match name.as_str() {
        "minimal" => healthy(),
        "complete" => match client.ping().await {
            Ok(()) => healthy(),
            Err(e) => {
                tracing::warn!(error = %e, "complete health check failed");
                (StatusCode::SERVICE_UNAVAILABLE, Json(HealthStatus { status: "unhealthy" })).into_response()
            }
        },
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn healthy() -> Response {
    (StatusCode::OK, Json(HealthStatus { status: "healthy" })).into_response()
}

#[cfg(test)]
#[path = "console_test.rs"]
mod tests;
