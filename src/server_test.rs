use std::net::SocketAddr;

use axum::routing::get;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

use super::*;
use crate::test_support::FlakyListener;

async fn local_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn router() -> Router {
    Router::new().route("/ok", get(|| async { "ok" }))
}

#[test]
fn listen_addr_binds_all_interfaces() {
    assert_eq!(listen_addr("8080"), "0.0.0.0:8080");
    assert_eq!(listen_addr(crate::config::DEFAULT_PORT), "0.0.0.0:8080");
}

#[tokio::test]
async fn bind_rejects_invalid_port() {
    let err = bind("not-a-port").await.unwrap_err();
    assert!(matches!(err, ServeError::Bind { ref addr, .. } if addr == "0.0.0.0:not-a-port"));
}

#[tokio::test]
async fn bind_rejects_port_in_use() {
    let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = taken.local_addr().unwrap().port().to_string();
    let err = bind(&port).await.unwrap_err();
    assert!(matches!(err, ServeError::Bind { .. }));
}

#[tokio::test]
async fn serves_requests_until_shutdown() {
    let (listener, addr) = local_listener().await;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, router(), async {
        stop_rx.await.unwrap_or(());
    }));

    let body = reqwest::get(format!("http://{addr}/ok")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "ok");

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(15), server).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn immediate_shutdown_is_clean() {
    let (listener, _) = local_listener().await;
    let result = serve(listener, router(), std::future::ready(())).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn run_reports_bind_failure() {
    let result = run(router(), "99999", std::future::pending::<()>()).await;
    assert!(matches!(result, Err(ServeError::Bind { .. })));
}

#[tokio::test]
async fn slow_headers_are_cut_off() {
    let (listener, addr) = local_listener().await;
    let server = tokio::spawn(serve(listener, router(), std::future::pending::<()>()));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /ok HTTP/1.1\r\nHost: localhost\r\n").await.unwrap();

    let mut buf = Vec::new();
    let read = tokio::time::timeout(READ_HEADER_TIMEOUT * 3, stream.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "connection still open after the header read timeout");

    server.abort();
}

#[tokio::test]
async fn idle_connection_is_cut_off() {
    let (listener, addr) = local_listener().await;
    let server = tokio::spawn(serve(listener, router(), std::future::pending::<()>()));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

    let mut buf = Vec::new();
    let read = tokio::time::timeout(READ_HEADER_TIMEOUT * 3, stream.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "silent connection still open after the header read timeout");

    server.abort();
}

// =============================================================================
// Accept errors
// =============================================================================

#[tokio::test]
async fn fd_exhaustion_is_retried() {
    // EMFILE
    let (listener, addr) = FlakyListener::bind([io::Error::from_raw_os_error(24)]).await;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, router(), async {
        stop_rx.await.unwrap_or(());
    }));

    let body = reqwest::get(format!("http://{addr}/ok")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "ok");
    assert!(!server.is_finished());

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(15), server).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn shutdown_interrupts_accept_backoff() {
    let (listener, _) = FlakyListener::bind([io::Error::other("accept failed")]).await;
    let shutdown = tokio::time::sleep(Duration::from_millis(50));

    let result = tokio::time::timeout(ACCEPT_ERROR_BACKOFF / 2, serve(listener, router(), shutdown))
        .await
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn broken_listener_stops_serving() {
    let (listener, _) = FlakyListener::bind([io::Error::from(io::ErrorKind::InvalidInput)]).await;

    let err = serve(listener, router(), std::future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, ServeError::Accept(ref e) if e.kind() == io::ErrorKind::InvalidInput));
}
