//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::admin::admin_router;
use super::middleware::AdmissionLayer;
use crate::error::{HaloError, Result};
use crate::ratelimit::{Bucket, RateLimiter};

/// Build the service router.
///
/// `/health` is never rate limited. Admin routes, when enabled, sit behind
/// the general bucket.
pub fn build_router(limiter: RateLimiter, admin_token: Option<&str>) -> Router {
    let mut limited = Router::new();
    match admin_token.filter(|t| !t.is_empty()) {
        Some(token) => limited = limited.merge(admin_router(limiter.clone(), token)),
        None => warn!("No admin token configured, admin routes disabled"),
    }

    let backend = limiter.backend_name();
    limited
        .layer(AdmissionLayer::new(limiter, Bucket::General))
        .route(
            "/health",
            get(move || async move { Json(json!({ "success": true, "status": "ok", "store": backend })) }),
        )
}

/// HTTP server for the admission service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    app: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, limiter: RateLimiter, admin_token: Option<&str>) -> Self {
        Self {
            addr,
            app: build_router(limiter, admin_token),
        }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "HTTP server listening");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            HaloError::Io(e)
        })
    }
}
