//! Network front doors for matchd
//!
//! An HTTP listener (axum) for the join, stats and health routes and a
//! WebSocket listener (tokio-tungstenite) for player ingestion and match
//! notifications. Both implement [`Server`] and stop on a shared
//! `CancellationToken`.
//!
//! ```ignore
//! let service = CombinedServer::new("matchd", ServerConfig::from(&config.server))
//!     .with_http_router(router)
//!     .with_ws_handler(handler);
//! service.run(shutdown.child_token()).await?;
//! ```

// WebSocket errors are large; they only travel on setup and per-connection paths
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod shutdown;
pub mod traits;
pub mod websocket;

pub use crate::config::{ports, ServerConfig};
pub use error::{Result, ServerError};
pub use health::HealthState;
pub use http::HttpServer;
pub use shutdown::ShutdownController;
pub use traits::{Server, ServerExt};
pub use websocket::{ConnectionHandle, ConnectionId, MessageHandler, WebSocketServer};

/// Time allowed for listeners to close after shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP and WebSocket listeners of one service
///
/// The first listener to fail stops the other one, and its error is returned
/// from [`Server::run`].
pub struct CombinedServer {
    name: String,
    config: ServerConfig,
    http_server: Option<HttpServer>,
    ws_server: Option<WebSocketServer>,
}

impl CombinedServer {
    /// Health-only HTTP when an HTTP port is configured.
    ///
    /// The WebSocket listener only exists once [`with_ws_handler`](Self::with_ws_handler)
    /// supplies its handler.
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        let name = name.into();
        let http_server = config
            .http_port
            .map(|_| HttpServer::health_only(config.clone(), &name));

        Self {
            name,
            config,
            http_server,
            ws_server: None,
        }
    }

    /// Replace the HTTP listener; ignored when HTTP is disabled
    pub fn with_http_server(mut self, server: HttpServer) -> Self {
        if self.config.http_port.is_some() {
            self.http_server = Some(server);
        }
        self
    }

    pub fn with_http_router(self, router: axum::Router) -> Self {
        let server = HttpServer::new(self.config.clone(), router);
        self.with_http_server(server)
    }

    /// Route WebSocket frames to `handler`; ignored when WebSocket is disabled
    pub fn with_ws_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        if self.config.websocket_port.is_some() {
            self.ws_server = Some(WebSocketServer::new(self.config.clone(), handler));
        }
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn websocket(&self) -> Option<&WebSocketServer> {
        self.ws_server.as_ref()
    }

    pub fn http(&self) -> Option<&HttpServer> {
        self.http_server.as_ref()
    }
}

type ListenerExit = (&'static str, Result<()>);

/// Log how a listener ended and keep its error, if any
fn listener_failure(joined: std::result::Result<ListenerExit, JoinError>) -> Option<ServerError> {
    match joined {
        Ok((listener, Ok(()))) => {
            info!(listener, "Listener stopped");
            None
        }
        Ok((listener, Err(e))) => {
            error!(listener, error = %e, "Listener failed");
            Some(e)
        }
        Err(e) => {
            error!(error = %e, "Listener task panicked");
            Some(ServerError::ListenerPanicked(e.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl Server for CombinedServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> Option<std::net::SocketAddr> {
        self.http_server
            .as_ref()
            .and_then(|s| s.address())
            .or_else(|| self.ws_server.as_ref().and_then(|s| s.address()))
    }

    fn is_running(&self) -> bool {
        self.http_server.as_ref().is_some_and(|s| s.is_running())
            || self.ws_server.as_ref().is_some_and(|s| s.is_running())
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let stop = shutdown.child_token();
        let mut listeners: JoinSet<ListenerExit> = JoinSet::new();

        if let Some(http) = self.http_server.clone() {
            let token = stop.clone();
            listeners.spawn(async move { ("http", http.run(token).await) });
        }
        if let Some(ws) = self.ws_server.clone() {
            let token = stop.clone();
            listeners.spawn(async move { ("websocket", ws.run(token).await) });
        }

        if listeners.is_empty() {
            warn!(service = %self.name, "No listeners configured");
            return Ok(());
        }
        info!(service = %self.name, listeners = listeners.len(), "Service started");

        let mut failure = None;
        tokio::select! {
            _ = shutdown.cancelled() => {}
            Some(joined) = listeners.join_next() => {
                failure = listener_failure(joined);
                if !shutdown.is_cancelled() {
                    warn!(service = %self.name, "Listener exited early, stopping the rest");
                }
                stop.cancel();
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while let Some(joined) = listeners.join_next().await {
                if let Some(e) = listener_failure(joined) {
                    failure.get_or_insert(e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(service = %self.name, "Listeners did not close in time, aborting");
            listeners.abort_all();
        }

        info!(service = %self.name, "Service stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
