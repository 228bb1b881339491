use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// KV bucket serving feature records
    #[serde(default = "default_feature_bucket")]
    pub feature_bucket: String,

    /// Per-record expiry in seconds
    #[serde(default = "default_feature_ttl_secs")]
    pub feature_ttl_secs: u64,

    /// Seconds between aggregation cycles
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Discovery horizon in days: tenants/entities without events inside it
    /// are skipped this cycle
    #[serde(default = "default_active_window_days")]
    pub active_window_days: i64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // ClickHouse configuration
    /// ClickHouse HTTP URL
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    /// ClickHouse database name
    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    /// ClickHouse username
    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    /// ClickHouse password
    #[serde(default = "default_clickhouse_password")]
    pub clickhouse_password: String,

    /// Table holding raw events
    #[serde(default = "default_raw_events_table")]
    pub raw_events_table: String,

    // Health endpoint configuration
    #[serde(default = "default_health_host")]
    pub health_host: String,

    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_feature_bucket() -> String {
    "features".to_string()
}

fn default_feature_ttl_secs() -> u64 {
    // Two cycles of headroom at the default interval
    7200
}

fn default_cycle_interval_secs() -> u64 {
    900
}

fn default_active_window_days() -> i64 {
    30
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// ClickHouse defaults
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "funnelcast".to_string()
}

fn default_clickhouse_username() -> String {
    "funnelcast".to_string()
}

fn default_clickhouse_password() -> String {
    "funnelcast".to_string()
}

fn default_raw_events_table() -> String {
    "raw_events".to_string()
}

// Health defaults
fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8081
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("FUNNELCAST"))
            .build()?
            .try_deserialize()
    }
}
