use crate::stats::MaterializerStats;
use common::{DeadLetterEvent, DeadLetterProducer, EventEnvelope, RawEvent};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Result of processing one inbound message.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The envelope validated; the event belongs in the current batch.
    Archived(RawEvent),
    /// The message was routed to the dead-letter sink. The caller acks it so
    /// malformed input is never redelivered.
    DeadLettered,
}

/// Validates inbound messages into raw events and owns the dead-letter path.
///
/// Dead-letter publish failures are logged and dropped, never retried: a
/// broken secondary sink must not backpressure the main pipeline.
pub struct IngestService {
    dead_letters: Arc<dyn DeadLetterProducer>,
    consumer_group: String,
    stats: Arc<MaterializerStats>,
}

impl IngestService {
    pub fn new(
        dead_letters: Arc<dyn DeadLetterProducer>,
        consumer_group: impl Into<String>,
        stats: Arc<MaterializerStats>,
    ) -> Self {
        Self {
            dead_letters,
            consumer_group: consumer_group.into(),
            stats,
        }
    }

    /// Parse and validate one message into a raw event, or dead-letter it.
    #[instrument(skip(self, payload), fields(source_topic = %source_topic))]
    pub async fn process(
        &self,
        payload: &[u8],
        source_topic: &str,
        ingest_partition: u32,
        ingest_offset: u64,
    ) -> ProcessOutcome {
        match EventEnvelope::parse(payload) {
            Ok(envelope) => {
                debug!(
                    event_id = %envelope.event_id,
                    tenant_id = %envelope.tenant_id,
                    event_type = %envelope.event_type,
                    "validated event envelope"
                );
                ProcessOutcome::Archived(RawEvent::from_envelope(
                    envelope,
                    source_topic,
                    ingest_partition,
                    ingest_offset,
                ))
            }
            Err(e) => {
                warn!(error = %e, "rejecting message to dead-letter sink");
                self.stats.incr_failed();
                let dead = DeadLetterEvent::from_raw_bytes(
                    payload,
                    e.to_string(),
                    source_topic,
                    &self.consumer_group,
                );
                self.publish_dead_letter(dead).await;
                ProcessOutcome::DeadLettered
            }
        }
    }

    /// Route one event of a failed batch insert to the dead-letter sink.
    pub async fn dead_letter_store_failure(&self, event: &RawEvent, reason: &str) {
        let dead = DeadLetterEvent::new(
            envelope_json(event),
            reason,
            &event.source_topic,
            &self.consumer_group,
        );
        self.publish_dead_letter(dead).await;
    }

    async fn publish_dead_letter(&self, dead: DeadLetterEvent) {
        self.stats.incr_dead_lettered();
        if let Err(e) = self.dead_letters.publish(&dead).await {
            // Logged and dropped: the record is lost, the loop continues.
            error!(error = %e, source_topic = %dead.source_topic, "failed to publish dead-letter record");
        }
    }
}

/// Rebuild the wire envelope from an already-parsed event so a store-failure
/// dead letter carries replayable content.
fn envelope_json(event: &RawEvent) -> serde_json::Value {
    serde_json::json!({
        "event_id": event.event_id,
        "event_type": event.event_type,
        "entity_id": event.entity_id,
        "tenant_id": event.tenant_id,
        "payload": event.payload,
        "event_timestamp": event.event_timestamp.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DomainError, MockDeadLetterProducer};

    fn valid_payload() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "event_id": "evt-1",
            "event_type": "cart.add",
            "entity_id": "user-42",
            "tenant_id": "acme",
            "payload": {"sku": "A-100"},
            "event_timestamp": "2026-05-01T12:00:00Z"
        }))
        .unwrap()
    }

    fn service_with(producer: MockDeadLetterProducer) -> IngestService {
        IngestService::new(
            Arc::new(producer),
            "materializer",
            Arc::new(MaterializerStats::default()),
        )
    }

    #[tokio::test]
    async fn valid_message_is_archived_not_dead_lettered() {
        // No publish expectation: a dead-letter call would panic the mock.
        let producer = MockDeadLetterProducer::new();
        let service = service_with(producer);

        let outcome = service.process(&valid_payload(), "events.web", 0, 7).await;

        match outcome {
            ProcessOutcome::Archived(event) => {
                assert_eq!(event.event_id, "evt-1");
                assert_eq!(event.source_topic, "events.web");
                assert_eq!(event.ingest_offset, 7);
            }
            ProcessOutcome::DeadLettered => panic!("valid message was dead-lettered"),
        }
    }

    #[tokio::test]
    async fn missing_field_routes_to_dead_letter_with_reason() {
        let mut producer = MockDeadLetterProducer::new();
        producer
            .expect_publish()
            .withf(|dead: &DeadLetterEvent| {
                dead.error_reason.contains("entity_id")
                    && dead.source_topic == "events.web"
                    && dead.consumer_group == "materializer"
            })
            .times(1)
            .return_once(|_| Ok(()));

        let payload = serde_json::to_vec(&serde_json::json!({
            "event_id": "evt-1",
            "event_type": "cart.add",
            "tenant_id": "acme",
            "event_timestamp": "2026-05-01T12:00:00Z"
        }))
        .unwrap();

        let service = service_with(producer);
        let outcome = service.process(&payload, "events.web", 0, 7).await;
        assert!(matches!(outcome, ProcessOutcome::DeadLettered));
    }

    #[tokio::test]
    async fn undecodable_bytes_preserve_original_content() {
        let mut producer = MockDeadLetterProducer::new();
        producer
            .expect_publish()
            .withf(|dead: &DeadLetterEvent| {
                dead.original_event == serde_json::Value::String("not json".to_string())
            })
            .times(1)
            .return_once(|_| Ok(()));

        let service = service_with(producer);
        let outcome = service.process(b"not json", "events.web", 0, 1).await;
        assert!(matches!(outcome, ProcessOutcome::DeadLettered));
    }

    #[tokio::test]
    async fn dead_letter_sink_failure_is_swallowed() {
        let mut producer = MockDeadLetterProducer::new();
        producer.expect_publish().times(1).return_once(|_| {
            Err(DomainError::RepositoryError(anyhow::anyhow!(
                "dead-letter stream unavailable"
            )))
        });

        let service = service_with(producer);
        // Must not propagate: the loop never blocks on the secondary path.
        let outcome = service.process(b"{", "events.web", 0, 1).await;
        assert!(matches!(outcome, ProcessOutcome::DeadLettered));
    }

    #[tokio::test]
    async fn store_failure_dead_letter_carries_replayable_envelope() {
        let mut producer = MockDeadLetterProducer::new();
        producer
            .expect_publish()
            .withf(|dead: &DeadLetterEvent| {
                dead.error_reason.contains("insert failed")
                    && dead.original_event["event_id"] == "evt-1"
                    && dead.original_event["payload"]["sku"] == "A-100"
            })
            .times(1)
            .return_once(|_| Ok(()));

        let service = service_with(producer);
        let event = match service.process(&valid_payload(), "events.web", 0, 7).await {
            ProcessOutcome::Archived(event) => event,
            ProcessOutcome::DeadLettered => panic!("expected archived event"),
        };

        service
            .dead_letter_store_failure(&event, "batch insert failed: connection reset")
            .await;
    }

    #[tokio::test]
    async fn counters_track_failures_and_dead_letters() {
        let mut producer = MockDeadLetterProducer::new();
        producer.expect_publish().returning(|_| Ok(()));

        let stats = Arc::new(MaterializerStats::default());
        let service = IngestService::new(Arc::new(producer), "materializer", stats.clone());

        service.process(b"junk", "events.web", 0, 1).await;
        service.process(b"junk", "events.web", 0, 2).await;

        assert_eq!(stats.events_failed(), 2);
        assert_eq!(stats.events_dead_lettered(), 2);
    }
}
