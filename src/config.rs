//! Startup configuration resolved from the command line and environment.
//!
//! SYSTEM CONTEXT
//! ==============
//! `bootstrap` resolves a [`Config`] before anything touches the database.
//! Resolution is a pure function of the argument list and an environment
//! lookup, so a missing `DATABASE_URL` or a bad `-prefix` surfaces as a
//! [`ConfigError`] and the exit decision stays in one place.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

use clap::Parser;

pub const DEFAULT_PREFIX: &str = "/";
pub const DEFAULT_PORT: &str = "8080";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid path prefix {prefix:?}: must start with '/'")]
    InvalidPrefix { prefix: String },
    #[error("missing required env var {name}")]
    MissingEnv { name: &'static str },
    #[error("invalid command line: {0}")]
    Args(#[from] clap::Error),
}

#[derive(Parser, Debug)]
#[command(name = "riverui", about = "River job-queue console server")]
struct Cli {
    /// Path prefix to use for the API and UI HTTP requests.
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,
}

// =============================================================================
// CONFIG
// =============================================================================

/// Validated, immutable startup configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Always starts with `/`; ends with `/` only when it is exactly `/`.
    pub path_prefix: String,
    /// Raw comma-split `CORS_ORIGINS`. An unset variable yields `[""]`.
    pub cors_origins: Vec<String>,
    pub database_url: String,
    pub db_max_connections: u32,
    pub port: String,
    pub otel_enabled: bool,
    pub basic_auth_user: String,
    pub basic_auth_password: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path_prefix", &self.path_prefix)
            .field("cors_origins", &self.cors_origins)
            .field("database_url", &"<redacted>")
            .field("db_max_connections", &self.db_max_connections)
            .field("port", &self.port)
            .field("otel_enabled", &self.otel_enabled)
            .field("basic_auth_user", &self.basic_auth_user)
            .field("basic_auth_password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Resolve configuration from `args` (including the program name) and an
    /// environment lookup.
    ///
    /// Environment:
    /// - `DATABASE_URL`: required
    /// - `PORT`: default `8080`
    /// - `CORS_ORIGINS`: comma-separated, passed through untrimmed
    /// - `OTEL_ENABLED`: enabled only for exactly `true`
    /// - `BASIC_AUTH_USER` / `BASIC_AUTH_PASSWORD`: optional
    /// - `DB_MAX_CONNECTIONS`: default 5, ignored when unparsable
    ///
    /// # Errors
    ///
    /// Returns an error if the command line does not parse, the prefix is
    /// invalid, or `DATABASE_URL` is missing. The prefix is checked first.
    pub fn resolve<I, T, F>(args: I, env: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
        F: Fn(&str) -> Option<String>,
    {
        let cli = Cli::try_parse_from(go_style_flags(args))?;
        let path_prefix = validate_path_prefix(&cli.prefix)?;

        let cors_origins = split_origins(&env("CORS_ORIGINS").unwrap_or_default());
        let database_url = required(&env, "DATABASE_URL")?;
        let otel_enabled = env("OTEL_ENABLED").as_deref() == Some("true");
        let port = env("PORT")
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PORT.to_string());
        let db_max_connections = parse_or(env("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS);

        Ok(Self {
            path_prefix,
            cors_origins,
            database_url,
            db_max_connections,
            port,
            otel_enabled,
            basic_auth_user: env("BASIC_AUTH_USER").unwrap_or_default(),
            basic_auth_password: env("BASIC_AUTH_PASSWORD").unwrap_or_default(),
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Environment lookup backed by the process environment.
#[must_use]
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// `RIVER_DEBUG` selects the verbose log level when it is `1` or `true`.
pub fn debug_enabled<F>(env: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    matches!(env("RIVER_DEBUG").as_deref(), Some("1" | "true"))
}

/// Reject a raw prefix that is empty or relative, then normalize it.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPrefix`] when `raw` does not start with `/`.
pub fn validate_path_prefix(raw: &str) -> Result<String, ConfigError> {
    if !raw.starts_with('/') {
        return Err(ConfigError::InvalidPrefix { prefix: raw.to_string() });
    }
    Ok(normalize_path_prefix(raw))
}

/// Strip trailing slashes and make sure the result is rooted.
#[must_use]
pub fn normalize_path_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Split `CORS_ORIGINS` with no trimming or filtering: `""` becomes `[""]`.
#[must_use]
pub fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',').map(str::to_string).collect()
}

fn required<F>(env: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    env(name)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingEnv { name })
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

/// Accept the single-dash `-prefix` spelling alongside clap's `--prefix`.
fn go_style_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some(s) if s == "-prefix" || s.starts_with("-prefix=") => OsString::from(format!("-{s}")),
            _ => arg,
        })
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
