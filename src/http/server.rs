//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::health::healthz;
use super::middleware::{rate_limit, Interceptor};
use crate::error::Result;

/// Path of the health check endpoint.
pub const HEALTHZ_PATH: &str = "/api/v1/healthz";

/// Build the router, with every route behind the rate limiting interceptor.
pub fn router(interceptor: Arc<Interceptor>) -> Router {
    Router::new()
        .route(HEALTHZ_PATH, get(healthz))
        .layer(middleware::from_fn_with_state(interceptor, rate_limit))
}

/// HTTP server for the rate limited routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The request interceptor
    interceptor: Arc<Interceptor>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, interceptor: Arc<Interceptor>) -> Self {
        Self { addr, interceptor }
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

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router(self.interceptor).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
