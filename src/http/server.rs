//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::RateLimitState;
use super::routes::router;
use crate::error::Result;
use crate::ratelimit::{CounterStore, RateLimiter};

/// HTTP server fronting the application with the rate limiter.
pub struct HttpServer<S: CounterStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter<S>>,
    /// Request header carrying the caller's identity
    identity_header: String,
}

impl<S: CounterStore + 'static> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(
        addr: SocketAddr,
        rate_limiter: Arc<RateLimiter<S>>,
        identity_header: impl Into<String>,
    ) -> Self {
        Self {
            addr,
            rate_limiter,
            identity_header: identity_header.into(),
        }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener with graceful shutdown.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(RateLimitState::new(self.rate_limiter, &self.identity_header));

        info!(
            addr = %listener.local_addr()?,
            identity_header = %self.identity_header,
            "Starting HTTP server with rate limiting"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{InMemoryCounterStore, Policy, PolicyTable, IDENTITY_HEADER};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn limiter(max_requests: u64) -> Arc<RateLimiter<InMemoryCounterStore>> {
        Arc::new(RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            PolicyTable::new(Policy::new(Duration::from_secs(60), max_requests)),
        ))
    }

    async fn get(addr: SocketAddr, user: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET / HTTP/1.1\r\nHost: localhost\r\n{}: {}\r\nConnection: close\r\n\r\n",
            IDENTITY_HEADER, user
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let _server = HttpServer::new(addr, limiter(10), IDENTITY_HEADER);
    }

    #[tokio::test]
    async fn test_serves_rate_limited_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = HttpServer::new(addr, limiter(1), IDENTITY_HEADER);
        let handle = tokio::spawn(server.serve_listener(listener, async move {
            let _ = shutdown_rx.await;
        }));

        let first = get(addr, "alice").await;
        assert!(first.starts_with("HTTP/1.1 200 OK"));
        assert!(first.to_lowercase().contains("x-ratelimit-remaining: 0"));
        assert!(first.contains(crate::http::WELCOME_MESSAGE));

        let second = get(addr, "alice").await;
        assert!(second.starts_with("HTTP/1.1 429"));
        assert!(second.to_lowercase().contains("retry-after:"));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
