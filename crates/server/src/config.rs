//! Server configuration

use crate::error::{Result, ServerError};
use std::net::SocketAddr;

/// Default matchd ports
pub mod ports {
    /// HTTP API port
    pub const MATCHD_HTTP: u16 = 8083;
    /// WebSocket front door port
    pub const MATCHD_WS: u16 = 8889;
}

/// Bind configuration for the HTTP and WebSocket servers
///
/// Each port is optional, allowing you to run only the protocols you need.
///
/// ```
/// use server::config::ServerConfig;
///
/// let both = ServerConfig::new("0.0.0.0", 8083, 8889);
/// let ws = ServerConfig::websocket_only("127.0.0.1", 8889);
/// assert!(both.http_port.is_some() && ws.http_port.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Optional HTTP port
    pub http_port: Option<u16>,
    /// Optional WebSocket port
    pub websocket_port: Option<u16>,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, http: u16, ws: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(http),
            websocket_port: Some(ws),
        }
    }

    pub fn http_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: Some(port),
            websocket_port: None,
        }
    }

    pub fn websocket_only(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            http_port: None,
            websocket_port: Some(port),
        }
    }

    /// Get HTTP socket address
    pub fn http_addr(&self) -> Option<Result<SocketAddr>> {
        self.http_port.map(|p| self.parse_addr(p))
    }

    /// Get WebSocket socket address
    pub fn websocket_addr(&self) -> Option<Result<SocketAddr>> {
        self.websocket_port.map(|p| self.parse_addr(p))
    }

    /// Check if any servers are configured
    pub fn has_servers(&self) -> bool {
        self.http_port.is_some() || self.websocket_port.is_some()
    }

    fn parse_addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, port)))
    }
}

/// `http_port: 0` in the settings file disables the HTTP server
impl From<&::config::ServerSettings> for ServerConfig {
    fn from(settings: &::config::ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            http_port: (settings.http_port != 0).then_some(settings.http_port),
            websocket_port: Some(settings.ws_port),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", ports::MATCHD_HTTP, ports::MATCHD_WS)
    }
}
