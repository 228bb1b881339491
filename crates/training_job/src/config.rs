use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

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

    /// Table receiving training samples
    #[serde(default = "default_samples_table")]
    pub samples_table: String,

    /// Table receiving run bookkeeping rows
    #[serde(default = "default_runs_table")]
    pub runs_table: String,

    // Generation parameters
    /// Event type anchoring each sample's observation timestamp
    #[serde(default = "default_trigger_event_type")]
    pub trigger_event_type: String,

    /// Event type that makes a sample positive
    #[serde(default = "default_label_event_type")]
    pub label_event_type: String,

    /// Forward-looking label horizon in days
    #[serde(default = "default_label_window_days")]
    pub label_window_days: i64,
}

fn default_log_level() -> String {
    "info".to_string()
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

fn default_samples_table() -> String {
    "training_samples".to_string()
}

fn default_runs_table() -> String {
    "training_runs".to_string()
}

// Generation defaults
fn default_trigger_event_type() -> String {
    "cart.add".to_string()
}

fn default_label_event_type() -> String {
    "order.completed".to_string()
}

fn default_label_window_days() -> i64 {
    7
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("FUNNELCAST"))
            .build()?
            .try_deserialize()
    }
}
