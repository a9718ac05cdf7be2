use crate::*;
use thiserror::Error;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "json", "compact"];
const MESSAGING_TYPES: [&str; 3] = ["memory", "redis_stream", "redis_pubsub"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Service name is required")]
    MissingServiceName,

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must be a power of two, got {value}")]
    NotPowerOfTwo { field: String, value: usize },

    #[error("Matching: {message}")]
    InvalidMatching { message: String },

    #[error("Unknown messaging type '{0}'. Must be one of: memory, redis_stream, redis_pubsub")]
    UnknownMessagingType(String),

    #[error("Messaging topic '{field}' must not be empty")]
    EmptyTopic { field: String },

    #[error("Invalid log level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format '{0}'. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Port {port} is assigned to both {first} and {second}")]
    PortConflict {
        port: u16,
        first: String,
        second: String,
    },

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MatchdConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    if config.service.name.trim().is_empty() {
        report.add_error(ValidationError::MissingServiceName);
    }

    validate_matching(&config.matching, &mut report);
    validate_notification(&config.notification, &mut report);
    validate_registry(&config.registry, &mut report);
    validate_messaging(&config.messaging, &mut report);
    validate_server(&config.server, &config.monitoring, &mut report);
    validate_monitoring(&config.monitoring, &mut report);

    report
}

fn require_positive(value: u64, field: &str, report: &mut ValidationReport) {
    if value == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: field.to_string(),
        });
    }
}

fn require_power_of_two(value: usize, field: &str, report: &mut ValidationReport) {
    if value == 0 || !value.is_power_of_two() {
        report.add_error(ValidationError::NotPowerOfTwo {
            field: field.to_string(),
            value,
        });
    }
}

fn validate_matching(matching: &MatchingConfig, report: &mut ValidationReport) {
    if matching.bucket_size <= 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.bucket_size".to_string(),
        });
    }
    if matching.max_score <= 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.max_score".to_string(),
        });
    }
    if matching.bucket_size > 0 && matching.max_score > 0 && matching.bucket_size > matching.max_score {
        report.add_error(ValidationError::InvalidMatching {
            message: format!(
                "bucket_size ({}) must not exceed max_score ({})",
                matching.bucket_size, matching.max_score
            ),
        });
    }

    require_positive(
        matching.expected_load_per_bucket as u64,
        "matching.expected_load_per_bucket",
        report,
    );
    require_positive(matching.scan_interval_ms, "matching.scan_interval_ms", report);
    require_positive(matching.sweep_interval_ms, "matching.sweep_interval_ms", report);
    require_positive(
        matching.counter_reset_interval_ms,
        "matching.counter_reset_interval_ms",
        report,
    );
    require_positive(matching.max_pending_events, "matching.max_pending_events", report);

    if matching.sweep_interval_ms < matching.scan_interval_ms {
        report.add_warning(
            "matching.sweep_interval_ms",
            "Global sweep runs more often than the per-bucket scan",
        );
    }

    if matching.low_traffic_threshold == 0 {
        report.add_warning(
            "matching.low_traffic_threshold",
            "Threshold of 0 disables the cross-bucket sweep",
        );
    }
}

fn validate_notification(notification: &NotificationConfig, report: &mut ValidationReport) {
    require_power_of_two(
        notification.ring_buffer_size,
        "notification.ring_buffer_size",
        report,
    );
    require_positive(notification.consumers as u64, "notification.consumers", report);
    require_positive(
        notification.shutdown_timeout_ms,
        "notification.shutdown_timeout_ms",
        report,
    );

    if notification.pair_timeout_ms == 0 {
        report.add_warning(
            "notification.pair_timeout_ms",
            "Every pair will be reported as stale",
        );
    }
}

fn validate_registry(registry: &RegistryConfig, report: &mut ValidationReport) {
    require_power_of_two(registry.shard_count, "registry.shard_count", report);
}

fn validate_messaging(messaging: &MessagingConfig, report: &mut ValidationReport) {
    let kind = messaging.messaging_type.to_lowercase();
    if !MESSAGING_TYPES.contains(&kind.as_str()) {
        report.add_error(ValidationError::UnknownMessagingType(
            messaging.messaging_type.clone(),
        ));
    }

    if messaging.topic.trim().is_empty() {
        report.add_error(ValidationError::EmptyTopic {
            field: "messaging.topic".to_string(),
        });
    }
    if messaging.join_topic.trim().is_empty() {
        report.add_error(ValidationError::EmptyTopic {
            field: "messaging.join_topic".to_string(),
        });
    }

    if kind.starts_with("redis") {
        match &messaging.redis {
            None => {
                let fallback = RedisConfig::default();
                report.add_default(
                    "messaging.redis",
                    &format!("{}:{}", fallback.host, fallback.port),
                );
            }
            Some(redis) => {
                for (field, value) in [("host", &redis.host), ("password", &redis.password)] {
                    if substitution::has_unresolved_env_vars(value) {
                        report.add_error(ValidationError::InvalidEnvVar {
                            var: value.clone(),
                            message: format!("messaging.redis.{field} was not resolved"),
                        });
                    }
                }
            }
        }
    } else if messaging.redis.is_some() {
        report.add_warning(
            "messaging.redis",
            "Redis settings are ignored by the selected messaging type",
        );
    }
}

fn validate_server(server: &ServerSettings, monitoring: &MonitoringConfig, report: &mut ValidationReport) {
    if server.ws_port == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "server.ws_port".to_string(),
        });
    }

    let mut ports = vec![("server.ws_port", server.ws_port)];
    if server.http_port != 0 {
        ports.push(("server.http_port", server.http_port));
    }
    if monitoring.metrics.enabled {
        ports.push(("monitoring.metrics.prometheus_port", monitoring.metrics.prometheus_port));
    }

    for (i, (first, port)) in ports.iter().enumerate() {
        for (second, other) in ports.iter().skip(i + 1) {
            if port == other && *port != 0 {
                report.add_error(ValidationError::PortConflict {
                    port: *port,
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
        }
    }
}

fn validate_monitoring(monitoring: &MonitoringConfig, report: &mut ValidationReport) {
    let level = monitoring.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        report.add_error(ValidationError::InvalidLogLevel(
            monitoring.logging.level.clone(),
        ));
    }

    let format = monitoring.logging.format.to_lowercase();
    if !LOG_FORMATS.contains(&format.as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(
            monitoring.logging.format.clone(),
        ));
    }
}
