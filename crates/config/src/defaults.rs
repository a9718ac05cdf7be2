pub fn default_service_name() -> String {
    "matchd".to_string()
}

pub fn default_environment() -> String {
    "development".to_string()
}

// === Matching ===

pub fn default_bucket_size() -> i32 {
    10
}

pub fn default_max_score() -> i32 {
    100
}

pub fn default_expected_load_per_bucket() -> usize {
    50_000
}

pub fn default_initial_delay_ms() -> u64 {
    500
}

pub fn default_scan_interval_ms() -> u64 {
    200
}

pub fn default_sweep_interval_ms() -> u64 {
    1_000
}

pub fn default_counter_reset_interval_ms() -> u64 {
    1_000
}

pub fn default_low_traffic_threshold() -> u64 {
    10
}

pub fn default_max_pending_events() -> u64 {
    20_000
}

// === Notification ===

pub fn default_ring_buffer_size() -> usize {
    1024
}

pub fn default_consumers() -> usize {
    4
}

pub fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

pub fn default_pair_timeout_ms() -> u64 {
    500
}

pub fn default_report_interval_ms() -> u64 {
    800
}

// === Registry ===

pub fn default_shard_count() -> usize {
    128
}

// === Messaging ===

pub fn default_messaging_type() -> String {
    "memory".to_string()
}

pub fn default_pairs_topic() -> String {
    "match.pairs".to_string()
}

pub fn default_join_topic() -> String {
    "match.join".to_string()
}

pub fn default_consumer_group() -> String {
    "matchd".to_string()
}

pub fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_redis_port() -> u16 {
    6379
}

// === Server ===

pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_http_port() -> u16 {
    8083
}

pub fn default_ws_port() -> u16 {
    8889
}

// === Monitoring ===

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_prometheus_port() -> u16 {
    9090
}
