//! HTTP front door (axum)
//!
//! Serves the join, stats and health routes. The listener drains in-flight
//! requests once the shutdown token fires.

use async_trait::async_trait;
use axum::Router;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::health::{health_routes, HealthState};
use crate::traits::Server;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
    running: Arc<AtomicBool>,
    bound_addr: Arc<RwLock<Option<SocketAddr>>>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self {
            config,
            router,
            running: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(RwLock::new(None)),
        }
    }

    /// Only `GET /health`, reported under `service`
    pub fn health_only(config: ServerConfig, service: &str) -> Self {
        Self::new(config, health_routes(Arc::new(HealthState::new(service))))
    }

    /// Wrap `router` with request ids, tracing and a per-request timeout
    pub fn with_defaults(config: ServerConfig, router: Router, timeout: Duration) -> Self {
        let header = axum::http::HeaderName::from_static(REQUEST_ID_HEADER);
        let router = router
            .layer(TimeoutLayer::new(timeout))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(header.clone()))
            .layer(SetRequestIdLayer::new(header, MakeRequestUuid));
        Self::new(config, router)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        self.config
            .http_addr()
            .ok_or_else(|| ServerError::ConfigError("HTTP port not configured".into()))?
    }
}

#[async_trait]
impl Server for HttpServer {
    fn name(&self) -> &str {
        "http"
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.bound_addr.read()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;
        let local_addr = listener.local_addr()?;

        *self.bound_addr.write() = Some(local_addr);
        self.running.store(true, Ordering::Release);
        info!(%local_addr, "HTTP API listening");

        let result = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.running.store(false, Ordering::Release);
        *self.bound_addr.write() = None;

        result.map_err(|e| {
            error!(%e, "HTTP API failed");
            ServerError::Io(e)
        })?;
        info!("HTTP API stopped");
        Ok(())
    }
}
