use async_trait::async_trait;
use common::{DeadLetterEvent, DeadLetterProducer, DomainError, DomainResult, JetStreamPublisher};
use std::sync::Arc;
use tracing::debug;

/// Publishes dead-letter records to the dedicated dead-letter subject.
pub struct NatsDeadLetterProducer {
    publisher: Arc<dyn JetStreamPublisher>,
    subject: String,
}

impl NatsDeadLetterProducer {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>, subject: impl Into<String>) -> Self {
        Self {
            publisher,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl DeadLetterProducer for NatsDeadLetterProducer {
    async fn publish(&self, event: &DeadLetterEvent) -> DomainResult<()> {
        let payload =
            serde_json::to_vec(event).map_err(|e| DomainError::RepositoryError(e.into()))?;

        self.publisher
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(DomainError::RepositoryError)?;

        debug!(
            subject = %self.subject,
            source_topic = %event.source_topic,
            "published dead-letter record"
        );
        Ok(())
    }
}
