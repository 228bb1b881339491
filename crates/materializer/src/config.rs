use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream holding inbound business events
    #[serde(default = "default_event_stream")]
    pub event_stream: String,

    /// Comma-separated event subjects to consume
    #[serde(default = "default_event_subjects")]
    pub event_subjects: String,

    /// Durable consumer (consumer group) name
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// JetStream stream holding dead-letter records
    #[serde(default = "default_dead_letter_stream")]
    pub dead_letter_stream: String,

    /// Subject for dead-letter records; never part of the consumed subjects
    #[serde(default = "default_dead_letter_subject")]
    pub dead_letter_subject: String,

    /// Events buffered before a size-triggered flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max seconds between the first buffered event and its flush
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Max seconds one fetch waits for messages
    #[serde(default = "default_fetch_wait_secs")]
    pub fetch_wait_secs: u64,

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

    /// Table receiving raw events
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

fn default_event_stream() -> String {
    "events".to_string()
}

fn default_event_subjects() -> String {
    "events.web,events.mobile,events.orders".to_string()
}

fn default_consumer_name() -> String {
    "materializer".to_string()
}

fn default_dead_letter_stream() -> String {
    "dead_letters".to_string()
}

fn default_dead_letter_subject() -> String {
    "dead_letters.events".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_secs() -> u64 {
    5
}

fn default_fetch_wait_secs() -> u64 {
    1
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
    8080
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("FUNNELCAST"))
            .build()?
            .try_deserialize()
    }

    /// The subjects the consumer subscribes to. The dead-letter subject is
    /// filtered out here so a misconfiguration cannot create a feedback
    /// loop of the consumer eating its own dead letters.
    pub fn consumed_subjects(&self) -> Vec<String> {
        self.event_subjects
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .filter(|s| {
                if s == &self.dead_letter_subject {
                    warn!(subject = %s, "dead-letter subject listed in event_subjects, ignoring");
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}
