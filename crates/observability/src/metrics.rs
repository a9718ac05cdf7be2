//! Prometheus metrics infrastructure
//!
//! Installs the Prometheus exporter and provides the metric sets matchd
//! publishes: connection activity on the WebSocket front door and periodic
//! samples of the matching core's counters.

use metrics::{counter, gauge, Counter, Gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize the Prometheus metrics exporter
///
/// This starts an HTTP server on the specified port that exposes metrics
/// at the `/metrics` endpoint.
///
/// ```ignore
/// observability::metrics::init_metrics(9090)?;
/// // Metrics available at http://localhost:9090/metrics
/// ```
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Connection metrics for one server
///
/// * `server_active_connections` - Number of open connections
/// * `server_messages_total` - Inbound messages accepted for processing
/// * `server_messages_dropped_total` - Inbound messages that could not be decoded
/// * `server_send_failures_total` - Outbound writes that failed
#[derive(Clone)]
pub struct ServerMetrics {
    active_connections: Gauge,
    messages: Counter,
    dropped: Counter,
    send_failures: Counter,
    server_name: String,
}

impl ServerMetrics {
    /// Create metrics for a specific server (e.g. "websocket")
    pub fn new(server_name: &str) -> Self {
        let name = server_name.to_string();

        Self {
            active_connections: gauge!("server_active_connections", "server" => name.clone()),
            messages: counter!("server_messages_total", "server" => name.clone()),
            dropped: counter!("server_messages_dropped_total", "server" => name.clone()),
            send_failures: counter!("server_send_failures_total", "server" => name.clone()),
            server_name: name,
        }
    }

    /// Increment active connections (call when a connection is opened)
    pub fn connection_opened(&self) {
        self.active_connections.increment(1.0);
    }

    /// Decrement active connections (call when a connection is closed)
    pub fn connection_closed(&self) {
        self.active_connections.decrement(1.0);
    }

    pub fn message_received(&self) {
        self.messages.increment(1);
    }

    pub fn message_dropped(&self) {
        self.dropped.increment(1);
    }

    pub fn send_failed(&self) {
        self.send_failures.increment(1);
    }

    /// Get the server name
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

/// Point-in-time reading of the matching core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchSample {
    pub submitted: u64,
    pub rejected: u64,
    pub pairs_emitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending_events: u64,
    pub queued: u64,
    pub connections: u64,
}

/// Matching metrics, updated from periodic [`MatchSample`]s
///
/// Counters are set to the sampled totals, gauges to the sampled levels.
#[derive(Clone)]
pub struct MatchMetrics {
    submitted: Counter,
    rejected: Counter,
    pairs: Counter,
    delivered: Counter,
    failed: Counter,
    pending: Gauge,
    queued: Gauge,
    connections: Gauge,
}

impl MatchMetrics {
    pub fn new() -> Self {
        Self {
            submitted: counter!("matchd_requests_submitted_total"),
            rejected: counter!("matchd_requests_rejected_total"),
            pairs: counter!("matchd_pairs_total"),
            delivered: counter!("matchd_pairs_delivered_total"),
            failed: counter!("matchd_pairs_failed_total"),
            pending: gauge!("matchd_pending_events"),
            queued: gauge!("matchd_queued_requests"),
            connections: gauge!("matchd_registered_connections"),
        }
    }

    pub fn record(&self, sample: &MatchSample) {
        self.submitted.absolute(sample.submitted);
        self.rejected.absolute(sample.rejected);
        self.pairs.absolute(sample.pairs_emitted);
        self.delivered.absolute(sample.delivered);
        self.failed.absolute(sample.failed);
        self.pending.set(sample.pending_events as f64);
        self.queued.set(sample.queued as f64);
        self.connections.set(sample.connections as f64);
    }
}

impl Default for MatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_metrics_creation() {
        // No recorder installed; handles are no-ops
        let metrics = ServerMetrics::new("websocket");
        metrics.connection_opened();
        metrics.message_received();
        metrics.connection_closed();
        assert_eq!(metrics.server_name(), "websocket");
    }

    #[test]
    fn test_match_metrics_record() {
        let metrics = MatchMetrics::new();
        metrics.record(&MatchSample {
            submitted: 10,
            pairs_emitted: 4,
            ..MatchSample::default()
        });
    }
}
