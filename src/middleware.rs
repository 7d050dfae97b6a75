//! Cross-cutting HTTP layers around the UI server's router.
//!
//! SYSTEM CONTEXT
//! ==============
//! `compose` wraps the UI router in a fixed stack, outermost first:
//!
//! 1. panic recovery: a panicking handler becomes a logged 500
//! 2. request logging: one span per request, trace correlation when enabled
//! 3. CORS: configured origins only, `GET HEAD POST PUT`
//!
//! Recovery sits outside logging so a failure in the logging or CORS layers
//! cannot take the process down. Logging sits outside CORS so rejected
//! cross-origin requests still show up in the log.

use std::any::Any;

use axum::Router;
use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, MakeSpan, TraceLayer};
use tracing::{Level, Span};
use uuid::Uuid;

use crate::config::Config;

pub const ALLOWED_METHODS: [Method; 4] = [Method::GET, Method::HEAD, Method::POST, Method::PUT];

const TRACEPARENT: &str = "traceparent";

/// Wrap `base` in recovery, request logging and CORS.
pub fn compose(base: Router, config: &Config) -> Router {
    base.layer(
        ServiceBuilder::new()
            .layer(CatchPanicLayer::custom(recover_panic))
            .layer(request_trace(config.otel_enabled))
            .layer(cors(&config.cors_origins)),
    )
}

// =============================================================================
// RECOVERY
// =============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

fn recover_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "recovered from panic in request handler");

    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: "internal server error" })).into_response()
}

// =============================================================================
// REQUEST LOGGING
// =============================================================================

pub type RequestTraceLayer = TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan>;

/// Request and response events at `INFO`, inside a per-request span.
#[must_use]
pub fn request_trace(otel_enabled: bool) -> RequestTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(RequestSpan { with_trace_context: otel_enabled })
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}

/// Builds the per-request span. Minimal fields by default; `trace_id` and
/// `span_id` are added only in trace-correlated mode.
#[derive(Clone, Copy, Debug)]
pub struct RequestSpan {
    with_trace_context: bool,
}

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let id = Uuid::new_v4();
        let method = request.method();
        let path = request.uri().path();

        if self.with_trace_context {
            let ctx = TraceContext::from_headers(request.headers()).unwrap_or_default();
            tracing::info_span!(
                "request",
                %id,
                %method,
                %path,
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
            )
        } else {
            tracing::info_span!("request", %id, %method, %path)
        }
    }
}

/// W3C trace context carried by the `traceparent` header.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(TRACEPARENT)?.to_str().ok()?;
        Self::parse(value)
    }

    /// Parse `version-traceid-spanid-flags`. All-zero ids and version `ff`
    /// are invalid.
    #[must_use]
    pub fn parse(traceparent: &str) -> Option<Self> {
        let mut parts = traceparent.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        let valid = is_hex(version, 2)
            && version != "ff"
            && is_hex(trace_id, 32)
            && is_hex(span_id, 16)
            && is_hex(flags, 2)
            && !is_zero(trace_id)
            && !is_zero(span_id);
        if !valid || (version == "00" && parts.next().is_some()) {
            return None;
        }

        Some(Self { trace_id: trace_id.to_ascii_lowercase(), span_id: span_id.to_ascii_lowercase() })
    }
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

// =============================================================================
// CORS
// =============================================================================

/// CORS restricted to `origins`, with the fixed method set.
#[must_use]
pub fn cors(origins: &[String]) -> CorsLayer {
    CorsLayer::new()
        .allow_methods(ALLOWED_METHODS.to_vec())
        .allow_headers([ORIGIN, ACCEPT, CONTENT_TYPE, HeaderName::from_static("x-requested-with")])
        .allow_origin(allowed_origins(origins))
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }

    let patterns: Vec<OriginPattern> = origins.iter().filter_map(|o| OriginPattern::parse(o)).collect();
    if patterns.is_empty() {
        tracing::debug!("no CORS origins configured, cross-origin requests will be refused");
    }

    AllowOrigin::predicate(move |origin: &HeaderValue, _parts| {
        origin
            .to_str()
            .is_ok_and(|origin| patterns.iter().any(|p| p.matches(origin)))
    })
}

/// One configured origin. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPattern {
    Exact(String),
    /// A single `*`, e.g. `https://*.example.com`.
    Wildcard { prefix: String, suffix: String },
}

impl OriginPattern {
    /// Empty entries match nothing and are dropped. Entries with more than
    /// one `*` are dropped with a warning.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let lowered = raw.to_ascii_lowercase();
        match lowered.split_once('*') {
            None => Some(Self::Exact(lowered)),
            Some((_, suffix)) if suffix.contains('*') => {
                tracing::warn!(origin = %raw, "ignoring CORS origin with more than one wildcard");
                None
            }
            Some((prefix, suffix)) => Some(Self::Wildcard { prefix: prefix.to_string(), suffix: suffix.to_string() }),
        }
    }

    #[must_use]
    pub fn matches(&self, origin: &str) -> bool {
        let origin = origin.to_ascii_lowercase();
        match self {
            Self::Exact(expected) => origin == *expected,
            Self::Wildcard { prefix, suffix } => {
                origin.len() >= prefix.len() + suffix.len()
                    && origin.starts_with(prefix.as_str())
                    && origin.ends_with(suffix.as_str())
            }
        }
    }
}

#[cfg(test)]
#[path = "middleware_test.rs"]
mod tests;
