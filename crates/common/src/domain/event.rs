use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Wire contract for a business event published by the ingest API.
///
/// The payload is an open schema: only the envelope fields are validated
/// strictly, everything under `payload` passes through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub entity_id: String,
    pub tenant_id: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub event_timestamp: DateTime<Utc>,
}

/// Deserialization target for inbound messages. Every required field is an
/// `Option` so a missing field surfaces as a named validation error instead
/// of an opaque serde failure.
#[derive(Debug, Deserialize, Validate)]
struct EnvelopeCandidate {
    #[garde(required, inner(length(min = 1)))]
    event_id: Option<String>,
    #[garde(required, inner(length(min = 1)))]
    event_type: Option<String>,
    #[garde(required, inner(length(min = 1)))]
    entity_id: Option<String>,
    #[garde(required, inner(length(min = 1)))]
    tenant_id: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    payload: serde_json::Map<String, serde_json::Value>,
    #[garde(required)]
    event_timestamp: Option<DateTime<Utc>>,
}

impl EventEnvelope {
    /// Parse and validate a raw message payload.
    ///
    /// Returns `DomainError::InvalidEnvelope` with a reason naming the
    /// offending field(s); callers route that reason to the dead-letter sink.
    pub fn parse(payload: &[u8]) -> DomainResult<Self> {
        let candidate: EnvelopeCandidate = serde_json::from_slice(payload)
            .map_err(|e| DomainError::InvalidEnvelope(format!("malformed JSON envelope: {e}")))?;

        candidate
            .validate()
            .map_err(|report| DomainError::InvalidEnvelope(format_validation_errors(&report)))?;

        Ok(Self {
            event_id: candidate.event_id.unwrap_or_default(),
            event_type: candidate.event_type.unwrap_or_default(),
            entity_id: candidate.entity_id.unwrap_or_default(),
            tenant_id: candidate.tenant_id.unwrap_or_default(),
            payload: candidate.payload,
            event_timestamp: candidate.event_timestamp.unwrap_or_default(),
        })
    }
}

fn format_validation_errors(report: &garde::Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            if path.to_string().is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// An archived event in the columnar store. Immutable once written.
///
/// `ingest_partition`/`ingest_offset` carry the bus position for replay
/// bookkeeping; JetStream exposes a single per-stream sequence, so the
/// offset holds the stream sequence and the partition is fixed at 0.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub entity_id: String,
    pub event_type: String,
    pub source_topic: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub event_timestamp: DateTime<Utc>,
    pub ingest_partition: u32,
    pub ingest_offset: u64,
    pub ingested_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn from_envelope(
        envelope: EventEnvelope,
        source_topic: &str,
        ingest_partition: u32,
        ingest_offset: u64,
    ) -> Self {
        Self {
            event_id: envelope.event_id,
            tenant_id: envelope.tenant_id,
            entity_id: envelope.entity_id,
            event_type: envelope.event_type,
            source_topic: source_topic.to_string(),
            payload: envelope.payload,
            event_timestamp: envelope.event_timestamp,
            ingest_partition,
            ingest_offset,
            ingested_at: Utc::now(),
        }
    }
}

/// Input for storing raw events (batch operation)
#[derive(Debug, Clone)]
pub struct StoreEventsInput {
    pub events: Vec<RawEvent>,
}

/// A message the pipeline could not process, preserved for manual replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// The original message: the parsed envelope when parsing succeeded,
    /// otherwise the raw bytes as a lossy string.
    pub original_event: serde_json::Value,
    pub error_reason: String,
    pub source_topic: String,
    /// Epoch seconds.
    pub failed_at: i64,
    pub consumer_group: String,
}

impl DeadLetterEvent {
    pub fn new(
        original_event: serde_json::Value,
        error_reason: impl Into<String>,
        source_topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            original_event,
            error_reason: error_reason.into(),
            source_topic: source_topic.into(),
            failed_at: Utc::now().timestamp(),
            consumer_group: consumer_group.into(),
        }
    }

    /// Wrap an undecodable message body.
    pub fn from_raw_bytes(
        payload: &[u8],
        error_reason: impl Into<String>,
        source_topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self::new(
            serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()),
            error_reason,
            source_topic,
            consumer_group,
        )
    }
}

/// Repository trait for raw event storage.
/// Infrastructure layer (ClickHouse) implements this trait.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RawEventRepository: Send + Sync {
    /// Store a batch of raw events.
    /// Failure handling: the entire batch fails atomically (all-or-nothing).
    async fn store_batch(&self, input: StoreEventsInput) -> DomainResult<()>;
}

/// Trait for publishing dead-letter records to the dead-letter topic.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeadLetterProducer: Send + Sync {
    async fn publish(&self, event: &DeadLetterEvent) -> DomainResult<()>;
}
