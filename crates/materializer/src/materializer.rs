use crate::clickhouse::ClickHouseRawEventRepository;
use crate::consumer::MaterializerConsumer;
use crate::domain::IngestService;
use crate::nats::NatsDeadLetterProducer;
use crate::stats::MaterializerStats;
use anyhow::ensure;
use common::{EventStoreClient, JetStreamConsumer, JetStreamPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct MaterializerConfig {
    pub event_stream: String,
    pub event_subjects: Vec<String>,
    pub consumer_name: String,
    pub dead_letter_subject: String,
    pub raw_events_table: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub fetch_wait: Duration,
}

/// Wires the materializer from explicitly constructed clients.
pub struct Materializer {
    consumer: MaterializerConsumer,
    stats: Arc<MaterializerStats>,
}

impl Materializer {
    pub async fn new(
        event_store: EventStoreClient,
        consumer_client: Arc<dyn JetStreamConsumer>,
        publisher_client: Arc<dyn JetStreamPublisher>,
        config: MaterializerConfig,
    ) -> anyhow::Result<Self> {
        info!("initializing materializer");

        ensure!(
            !config.event_subjects.is_empty(),
            "materializer needs at least one event subject"
        );
        ensure!(
            !config.event_subjects.contains(&config.dead_letter_subject),
            "the dead-letter subject must not be among the consumed subjects"
        );

        let stats = Arc::new(MaterializerStats::default());

        let repository = Arc::new(ClickHouseRawEventRepository::new(
            event_store,
            config.raw_events_table.clone(),
        ));
        let dead_letters = Arc::new(NatsDeadLetterProducer::new(
            publisher_client,
            config.dead_letter_subject.clone(),
        ));
        let service = Arc::new(IngestService::new(
            dead_letters,
            config.consumer_name.clone(),
            stats.clone(),
        ));

        let consumer = MaterializerConsumer::new(
            consumer_client,
            &config.event_stream,
            &config.consumer_name,
            config.event_subjects,
            config.batch_size,
            config.batch_timeout,
            config.fetch_wait,
            service,
            repository,
            stats.clone(),
        )
        .await?;

        info!("materializer initialized");

        Ok(Self { consumer, stats })
    }

    pub fn stats(&self) -> Arc<MaterializerStats> {
        self.stats.clone()
    }

    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        let consumer = self.consumer;
        Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{MockJetStreamConsumer, MockJetStreamPublisher, MockPullConsumer};

    fn config() -> MaterializerConfig {
        MaterializerConfig {
            event_stream: "events".to_string(),
            event_subjects: vec!["events.web".to_string()],
            consumer_name: "materializer".to_string(),
            dead_letter_subject: "dead_letters.events".to_string(),
            raw_events_table: "raw_events".to_string(),
            batch_size: 100,
            batch_timeout: Duration::from_secs(5),
            fetch_wait: Duration::from_secs(1),
        }
    }

    fn event_store() -> EventStoreClient {
        EventStoreClient::new("http://localhost:8123", "funnelcast", "user", "pass")
    }

    #[tokio::test]
    async fn wires_up_with_valid_config() {
        let mut consumer_client = MockJetStreamConsumer::new();
        consumer_client
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Ok(Box::new(MockPullConsumer::new())));

        let result = Materializer::new(
            event_store(),
            Arc::new(consumer_client),
            Arc::new(MockJetStreamPublisher::new()),
            config(),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_consuming_the_dead_letter_subject() {
        let mut bad = config();
        bad.event_subjects.push("dead_letters.events".to_string());

        let result = Materializer::new(
            event_store(),
            Arc::new(MockJetStreamConsumer::new()),
            Arc::new(MockJetStreamPublisher::new()),
            bad,
        )
        .await;

        let err = result.err().unwrap();
        assert!(err.to_string().contains("dead-letter subject"));
    }

    #[tokio::test]
    async fn rejects_an_empty_subject_list() {
        let mut bad = config();
        bad.event_subjects.clear();

        let result = Materializer::new(
            event_store(),
            Arc::new(MockJetStreamConsumer::new()),
            Arc::new(MockJetStreamPublisher::new()),
            bad,
        )
        .await;

        assert!(result.is_err());
    }
}
