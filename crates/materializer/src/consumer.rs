use crate::batch::EventBatcher;
use crate::domain::{IngestService, ProcessOutcome};
use crate::stats::MaterializerStats;
use anyhow::Result;
use async_nats::jetstream;
use common::{JetStreamConsumer, PullConsumer, RawEventRepository, StoreEventsInput};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The materializer's consumption loop.
///
/// One durable pull consumer subscribed to every configured event subject;
/// messages are processed strictly in order, valid events accumulate in the
/// batcher, and their bus messages stay unacked until the batch flushes
/// (commit-after-flush, at-least-once). Cancellation drains the buffer
/// before the loop returns so already-pulled messages are never silently
/// dropped.
pub struct MaterializerConsumer {
    consumer: Box<dyn PullConsumer>,
    service: Arc<IngestService>,
    repository: Arc<dyn RawEventRepository>,
    batcher: EventBatcher,
    pending: Vec<jetstream::Message>,
    stats: Arc<MaterializerStats>,
    batch_size: usize,
    fetch_wait: Duration,
}

impl MaterializerConsumer {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        consumer_client: Arc<dyn JetStreamConsumer>,
        stream_name: &str,
        consumer_name: &str,
        subjects: Vec<String>,
        batch_size: usize,
        batch_timeout: Duration,
        fetch_wait: Duration,
        service: Arc<IngestService>,
        repository: Arc<dyn RawEventRepository>,
        stats: Arc<MaterializerStats>,
    ) -> Result<Self> {
        debug!(
            stream = %stream_name,
            consumer = %consumer_name,
            subjects = ?subjects,
            "creating materializer consumer"
        );

        let config = jetstream::consumer::pull::Config {
            name: Some(consumer_name.to_string()),
            durable_name: Some(consumer_name.to_string()),
            filter_subjects: subjects,
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = consumer_client.create_consumer(config, stream_name).await?;

        info!(
            stream = %stream_name,
            consumer = %consumer_name,
            "materializer consumer created"
        );

        Ok(Self {
            consumer,
            service,
            repository,
            batcher: EventBatcher::new(batch_size, batch_timeout),
            pending: Vec::new(),
            stats,
            batch_size,
            fetch_wait,
        })
    }

    /// Run until cancellation, then drain the remaining buffer.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!("starting materializer consumer loop");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("received shutdown signal, draining batch buffer");
                    self.flush().await;
                    break;
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        error!(error = %e, "error in consumer poll");
                        // Continue consuming despite errors
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!("materializer consumer stopped");
        Ok(())
    }

    /// One fetch-process-maybe-flush round.
    async fn poll_once(&mut self) -> Result<()> {
        // Never over-fetch past the batch boundary, and never wait past the
        // timeout flush deadline of an already-started batch.
        let max_messages = (self.batch_size - self.batcher.len()).max(1);
        let wait = match self.batcher.time_until_deadline() {
            Some(remaining) => remaining.min(self.fetch_wait),
            None => self.fetch_wait,
        };

        if !wait.is_zero() {
            let messages = self.consumer.fetch_messages(max_messages, wait).await?;
            for message in messages {
                self.process_message(message).await;
            }
        }

        if self.batcher.should_flush() {
            self.flush().await;
        }
        self.stats.set_pending_batch_len(self.batcher.len() as u64);

        Ok(())
    }

    async fn process_message(&mut self, message: jetstream::Message) {
        self.stats.incr_received();

        let offset = match message.info() {
            Ok(info) => info.stream_sequence,
            Err(e) => {
                warn!(error = %e, "message without stream position, recording offset 0");
                0
            }
        };

        let outcome = self
            .service
            .process(&message.payload, message.subject.as_str(), 0, offset)
            .await;

        match outcome {
            ProcessOutcome::Archived(event) => {
                self.batcher.push(event);
                self.pending.push(message);
            }
            ProcessOutcome::DeadLettered => {
                // Malformed input is preserved in the dead-letter sink and
                // must not be redelivered.
                ack(&message).await;
            }
        }
    }

    async fn flush(&mut self) {
        if self.batcher.is_empty() {
            return;
        }

        let events = self.batcher.take();
        let pending = std::mem::take(&mut self.pending);
        let count = events.len() as u64;

        self.stats.incr_flushes();
        let stored = flush_events(
            self.repository.as_ref(),
            self.service.as_ref(),
            events,
        )
        .await;

        if stored {
            self.stats.add_processed(count);
        }

        // Either the batch is in the event store or it is in the dead-letter
        // sink: both paths preserve the messages, so commit them.
        for message in &pending {
            ack(message).await;
        }
        self.stats.set_pending_batch_len(0);
    }
}

/// Attempt one batch insert; on failure route every event of the batch to
/// the dead-letter sink individually (bounded-attempt, fail-fast). Returns
/// whether the batch reached the event store.
pub async fn flush_events(
    repository: &dyn RawEventRepository,
    service: &IngestService,
    events: Vec<common::RawEvent>,
) -> bool {
    let count = events.len();
    debug!(event_count = count, "flushing event batch");

    match repository
        .store_batch(StoreEventsInput {
            events: events.clone(),
        })
        .await
    {
        Ok(()) => {
            debug!(event_count = count, "event batch stored");
            true
        }
        Err(e) => {
            error!(error = %e, event_count = count, "batch insert failed, dead-lettering batch");
            let reason = format!("batch insert failed: {e}");
            for event in &events {
                service.dead_letter_store_failure(event, &reason).await;
            }
            false
        }
    }
}

async fn ack(message: &jetstream::Message) {
    if let Err(e) = message.ack().await {
        // Redelivery after a missed ack is tolerated downstream.
        error!(error = %e, subject = %message.subject, "failed to acknowledge message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{
        DomainError, MockDeadLetterProducer, MockJetStreamConsumer, MockPullConsumer,
        MockRawEventRepository, RawEvent,
    };

    fn event(n: usize) -> RawEvent {
        RawEvent {
            event_id: format!("evt-{n}"),
            tenant_id: "acme".to_string(),
            entity_id: "user-1".to_string(),
            event_type: "cart.add".to_string(),
            source_topic: "events.web".to_string(),
            payload: serde_json::Map::new(),
            event_timestamp: Utc::now(),
            ingest_partition: 0,
            ingest_offset: n as u64,
            ingested_at: Utc::now(),
        }
    }

    fn service(producer: MockDeadLetterProducer) -> IngestService {
        IngestService::new(
            Arc::new(producer),
            "materializer",
            Arc::new(MaterializerStats::default()),
        )
    }

    #[tokio::test]
    async fn flush_success_stores_batch_without_dead_letters() {
        let mut repository = MockRawEventRepository::new();
        repository
            .expect_store_batch()
            .withf(|input: &StoreEventsInput| input.events.len() == 3)
            .times(1)
            .return_once(|_| Ok(()));

        // Any dead-letter publish would panic the mock.
        let service = service(MockDeadLetterProducer::new());

        let stored = flush_events(&repository, &service, vec![event(1), event(2), event(3)]).await;
        assert!(stored);
    }

    #[tokio::test]
    async fn failed_batch_dead_letters_every_event_individually() {
        let mut repository = MockRawEventRepository::new();
        repository.expect_store_batch().times(1).return_once(|_| {
            Err(DomainError::RepositoryError(anyhow::anyhow!(
                "connection reset"
            )))
        });

        let mut producer = MockDeadLetterProducer::new();
        producer
            .expect_publish()
            .withf(|dead: &common::DeadLetterEvent| {
                dead.error_reason.contains("batch insert failed")
                    && dead.error_reason.contains("connection reset")
            })
            .times(3)
            .returning(|_| Ok(()));

        let service = service(producer);
        let stored = flush_events(&repository, &service, vec![event(1), event(2), event(3)]).await;
        assert!(!stored);
    }

    #[tokio::test]
    async fn dead_letter_failures_do_not_abort_the_flush() {
        let mut repository = MockRawEventRepository::new();
        repository
            .expect_store_batch()
            .times(1)
            .return_once(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("down"))));

        // Every publish fails; flush_events must still visit all events.
        let mut producer = MockDeadLetterProducer::new();
        producer.expect_publish().times(2).returning(|_| {
            Err(DomainError::RepositoryError(anyhow::anyhow!(
                "dead-letter stream down"
            )))
        });

        let service = service(producer);
        let stored = flush_events(&repository, &service, vec![event(1), event(2)]).await;
        assert!(!stored);
    }

    #[tokio::test]
    async fn scenario_250_events_flush_as_100_100_50() {
        use crate::batch::EventBatcher;
        use std::sync::Mutex;

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let mut repository = MockRawEventRepository::new();
        {
            let sizes = sizes.clone();
            repository
                .expect_store_batch()
                .times(3)
                .returning(move |input| {
                    sizes.lock().unwrap().push(input.events.len());
                    Ok(())
                });
        }

        let service = service(MockDeadLetterProducer::new());
        let mut batcher = EventBatcher::new(100, Duration::from_secs(60));

        for n in 0..250 {
            batcher.push(event(n));
            if batcher.should_flush() {
                assert!(flush_events(&repository, &service, batcher.take()).await);
            }
        }
        // Shutdown drain picks up the remainder.
        if !batcher.is_empty() {
            assert!(flush_events(&repository, &service, batcher.take()).await);
        }

        assert_eq!(*sizes.lock().unwrap(), vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn consumer_creation_uses_durable_consumer_with_subject_filters() {
        let mut consumer_client = MockJetStreamConsumer::new();
        consumer_client
            .expect_create_consumer()
            .withf(
                |config: &jetstream::consumer::pull::Config, stream_name: &str| {
                    config.durable_name.as_deref() == Some("materializer")
                        && config.filter_subjects
                            == vec!["events.web".to_string(), "events.mobile".to_string()]
                        && stream_name == "events"
                },
            )
            .times(1)
            .returning(|_, _| Ok(Box::new(MockPullConsumer::new())));

        let result = MaterializerConsumer::new(
            Arc::new(consumer_client),
            "events",
            "materializer",
            vec!["events.web".to_string(), "events.mobile".to_string()],
            100,
            Duration::from_secs(5),
            Duration::from_secs(1),
            Arc::new(service(MockDeadLetterProducer::new())),
            Arc::new(MockRawEventRepository::new()),
            Arc::new(MaterializerStats::default()),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn consumer_creation_failure_propagates() {
        let mut consumer_client = MockJetStreamConsumer::new();
        consumer_client
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream not found")));

        let result = MaterializerConsumer::new(
            Arc::new(consumer_client),
            "events",
            "materializer",
            vec!["events.web".to_string()],
            100,
            Duration::from_secs(5),
            Duration::from_secs(1),
            Arc::new(service(MockDeadLetterProducer::new())),
            Arc::new(MockRawEventRepository::new()),
            Arc::new(MaterializerStats::default()),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_fetch_leaves_the_batch_untouched() {
        let mut consumer_client = MockJetStreamConsumer::new();
        consumer_client
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| {
                let mut pull = MockPullConsumer::new();
                pull.expect_fetch_messages()
                    .times(1)
                    .returning(|_, _| Ok(vec![]));
                Ok(Box::new(pull))
            });

        let stats = Arc::new(MaterializerStats::default());
        let mut consumer = MaterializerConsumer::new(
            Arc::new(consumer_client),
            "events",
            "materializer",
            vec!["events.web".to_string()],
            100,
            Duration::from_secs(5),
            Duration::from_secs(1),
            Arc::new(service(MockDeadLetterProducer::new())),
            Arc::new(MockRawEventRepository::new()),
            stats.clone(),
        )
        .await
        .unwrap();

        consumer.poll_once().await.unwrap();
        assert_eq!(stats.events_received(), 0);
        assert_eq!(stats.pending_batch_len(), 0);
    }
}
