mod clickhouse;
mod domain;
mod http;
mod nats;
mod telemetry;

pub use clickhouse::*;
pub use domain::*;
pub use http::*;
pub use nats::*;
pub use telemetry::*;

// Re-export mocks when the testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeadLetterProducer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEventAggregateRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEventHistoryRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockFeatureStore;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRawEventRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTrainingRunRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTrainingSampleRepository;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
