mod app;
mod bootstrap;
mod config;
mod db;
mod logging;
mod middleware;
mod server;
#[cfg(test)]
mod test_support;

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    logging::init(config::debug_enabled(config::process_env));

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
        Err(e) if e.not_found() => tracing::info!("no .env file detected, using environment variables"),
        Err(e) => tracing::warn!(error = %e, "failed to load .env file"),
    }

    let code = bootstrap::run(
        std::env::args_os(),
        config::process_env,
        &db::PgPoolFactory,
        &app::ConsoleServerFactory,
        server::shutdown_signal(),
    )
    .await;

    ExitCode::from(code)
}
