//! Logging and metrics for matchd
//!
//! [`init_logging`] installs the tracing subscriber once at startup, using the
//! format and level from `monitoring.logging`. [`init_metrics`] starts the
//! Prometheus exporter when `monitoring.metrics.enabled` is set. Metric
//! handles ([`ServerMetrics`], [`MatchMetrics`]) are cheap to clone and record
//! into whatever recorder is installed, or nowhere if none is.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, MatchMetrics, MatchSample, ServerMetrics};
