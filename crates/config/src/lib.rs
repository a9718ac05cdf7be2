use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

// ==================================================================================
// SERVICE
// ==================================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            environment: default_environment(),
        }
    }
}

// ==================================================================================
// MATCHING ENGINE
// ==================================================================================

/// Bucketing and scheduling of the matching engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// Width of each score bucket
    #[serde(default = "default_bucket_size")]
    pub bucket_size: i32,
    /// Highest expected score; sets the number of buckets
    #[serde(default = "default_max_score")]
    pub max_score: i32,
    /// Queue capacity of each bucket and size of its drain buffer
    #[serde(default = "default_expected_load_per_bucket")]
    pub expected_load_per_bucket: usize,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_counter_reset_interval_ms")]
    pub counter_reset_interval_ms: u64,
    /// The global sweep only runs while fewer submissions than this arrived
    /// in the current counter window
    #[serde(default = "default_low_traffic_threshold")]
    pub low_traffic_threshold: u64,
    /// Submissions are rejected while this many requests are queued
    #[serde(default = "default_max_pending_events")]
    pub max_pending_events: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            bucket_size: default_bucket_size(),
            max_score: default_max_score(),
            expected_load_per_bucket: default_expected_load_per_bucket(),
            initial_delay_ms: default_initial_delay_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            counter_reset_interval_ms: default_counter_reset_interval_ms(),
            low_traffic_threshold: default_low_traffic_threshold(),
            max_pending_events: default_max_pending_events(),
        }
    }
}

// ==================================================================================
// NOTIFICATION PIPELINE
// ==================================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Ring capacity, must be a power of two
    #[serde(default = "default_ring_buffer_size")]
    pub ring_buffer_size: usize,
    #[serde(default = "default_consumers")]
    pub consumers: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Age after which a pair is reported stale
    #[serde(default = "default_pair_timeout_ms")]
    pub pair_timeout_ms: u64,
    /// Throughput report period, 0 disables the reporter
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: default_ring_buffer_size(),
            consumers: default_consumers(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            pair_timeout_ms: default_pair_timeout_ms(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

// ==================================================================================
// CONNECTION REGISTRY
// ==================================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
        }
    }
}

// ==================================================================================
// MESSAGING
// ==================================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagingConfig {
    /// Backend: memory, redis_stream or redis_pubsub
    #[serde(rename = "type")]
    #[serde(default = "default_messaging_type")]
    pub messaging_type: String,
    /// Topic receiving match outcomes
    #[serde(default = "default_pairs_topic")]
    pub topic: String,
    /// Topic receiving join acknowledgements
    #[serde(default = "default_join_topic")]
    pub join_topic: String,
    /// Publish every processed pair to `topic`
    #[serde(default)]
    pub mirror_pairs: bool,
    /// Consumer group for log-structured backends
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: default_messaging_type(),
            topic: default_pairs_topic(),
            join_topic: default_join_topic(),
            mirror_pairs: false,
            consumer_group: default_consumer_group(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_index: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: String::new(),
            db_index: 0,
        }
    }
}

impl RedisConfig {
    /// Connection URL in `redis://[:password@]host:port/db` form
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db_index)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db_index
            )
        }
    }
}

// ==================================================================================
// SERVER
// ==================================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP API port, 0 disables the HTTP server
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// WebSocket ingestion port
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
        }
    }
}

// ==================================================================================
// MONITORING
// ==================================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// pretty, json or compact
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prometheus_port: default_prometheus_port(),
        }
    }
}

// ==================================================================================
// ROOT
// ==================================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatchdConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}
