//! Listener and connection loop.
//!
//! SYSTEM CONTEXT
//! ==============
//! The composed router is served on `0.0.0.0:<port>`, one task per
//! connection. Serving goes through `hyper-util` directly rather than
//! `axum::serve` so the header-read timeout is bounded and in-flight
//! connections can drain on shutdown.
//!
//! `Ok(())` means the shutdown signal fired and the loop stopped on purpose.
//! Any other way out is a [`ServeError`]. Accept errors that can clear on
//! their own are retried, so only a broken listening socket ends the loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::{TcpListener, TcpStream};
use tower::Service;

/// Bound on how long a client may take to send request headers.
pub const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(5);
/// How long in-flight connections get to finish after a shutdown signal.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);
/// Pause before accepting again after a transient accept error.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("error from listener: {0}")]
    Accept(#[source] io::Error),
}

/// `:<port>` on all IPv4 interfaces. IPv6 clients need a proxy in front.
#[must_use]
pub fn listen_addr(port: &str) -> String {
    format!("0.0.0.0:{port}")
}

/// Bind the listener for `port`.
///
/// # Errors
///
/// Returns [`ServeError::Bind`] if the address is invalid or in use.
pub async fn bind(port: &str) -> Result<TcpListener, ServeError> {
    let addr = listen_addr(port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })
}

/// Bind `port` and serve `handler` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if binding fails or the listener stops accepting.
pub async fn run<S>(handler: Router, port: &str, shutdown: S) -> Result<(), ServeError>
where
    S: Future<Output = ()>,
{
    let listener = bind(port).await?;
    serve(listener, handler, shutdown).await
}

/// Source of accepted connections. [`TcpListener`] is the only production
/// implementation.
pub trait Accept: Send {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    /// # Errors
    ///
    /// Returns the OS error if the socket has no local address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Accept for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Serve on an already-bound listener until `shutdown` resolves, then give
/// open connections [`SHUTDOWN_GRACE_PERIOD`] to finish.
///
/// Accept errors that may clear on their own, such as running out of file
/// descriptors, are logged and retried after [`ACCEPT_ERROR_BACKOFF`].
///
/// # Errors
///
/// Returns [`ServeError::Accept`] when the listener socket itself is unusable.
pub async fn serve<A, S>(mut listener: A, handler: Router, shutdown: S) -> Result<(), ServeError>
where
    A: Accept,
    S: Future<Output = ()>,
{
    let addr = listener.local_addr().map_err(ServeError::Accept)?;
    tracing::info!(%addr, "starting server");

    // HTTP/1 only: protocol sniffing would wait for the first bytes with no
    // deadline, before the header-read timer is armed.
    let mut builder = auto::Builder::new(TokioExecutor::new()).http1_only();
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(READ_HEADER_TIMEOUT);

    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) if is_connection_error(&e) => {
                    tracing::debug!(error = %e, "dropped connection during accept");
                    continue;
                }
                Err(e) if is_listener_error(&e) => return Err(ServeError::Accept(e)),
                Err(e) => {
                    tracing::error!(error = %e, "accept error, retrying");
                    tokio::select! {
                        () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                        () = &mut shutdown => break,
                    }
                }
            },
            () = &mut shutdown => break,
        };

        let tower_service = handler.clone();
        let service = hyper::service::service_fn(move |request: Request<Incoming>| {
            tower_service.clone().call(request)
        });

        let conn = builder.serve_connection(TokioIo::new(stream), service);
        let conn = graceful.watch(conn.into_owned());
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(%remote, error = %e, "connection closed with error");
            }
        });
    }

    tracing::info!("shutdown signal received, draining connections");
    drop(listener);
    tokio::select! {
        () = graceful.shutdown() => tracing::info!("server stopped"),
        () = tokio::time::sleep(SHUTDOWN_GRACE_PERIOD) => {
            tracing::warn!(grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(), "timed out draining connections");
        }
    }
    Ok(())
}

/// Errors scoped to one client; the listener itself is still healthy.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

/// The listening socket is invalid or not listening; retrying cannot help.
fn is_listener_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported)
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
