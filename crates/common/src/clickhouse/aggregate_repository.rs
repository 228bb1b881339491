use crate::clickhouse::EventStoreClient;
use crate::domain::{DomainError, DomainResult, EventAggregateRepository};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, error};

/// ClickHouse implementation of the windowed aggregate reads.
///
/// Every count deduplicates by `event_id`: at-least-once delivery means the
/// raw log may hold the same event twice, and the aggregates must not.
#[derive(Clone)]
pub struct ClickHouseAggregateRepository {
    client: EventStoreClient,
    table: String,
}

impl ClickHouseAggregateRepository {
    pub fn new(client: EventStoreClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl EventAggregateRepository for ClickHouseAggregateRepository {
    async fn count_events(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<u64> {
        let start = as_of - window;
        let sql = format!(
            "SELECT count(DISTINCT event_id) FROM {} \
             WHERE tenant_id = ? AND entity_id = ? AND event_type = ? \
             AND event_timestamp >= toDateTime(?) AND event_timestamp < toDateTime(?)",
            self.table
        );

        let count = self
            .client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(entity_id)
            .bind(event_type)
            .bind(start.timestamp())
            .bind(as_of.timestamp())
            .fetch_one::<u64>()
            .await
            .map_err(|e| {
                error!(event_type = %event_type, "event count query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        debug!(
            event_type = %event_type,
            window_days = window.num_days(),
            count,
            "counted events"
        );
        Ok(count)
    }

    async fn sum_amount(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<f64> {
        let start = as_of - window;
        // Inner query collapses redelivered duplicates before summing.
        let sql = format!(
            "SELECT sum(JSONExtractFloat(payload, 'amount')) FROM ( \
               SELECT event_id, any(payload) AS payload FROM {} \
               WHERE tenant_id = ? AND entity_id = ? AND event_type = ? \
               AND event_timestamp >= toDateTime(?) AND event_timestamp < toDateTime(?) \
               GROUP BY event_id)",
            self.table
        );

        self.client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(entity_id)
            .bind(event_type)
            .bind(start.timestamp())
            .bind(as_of.timestamp())
            .fetch_one::<f64>()
            .await
            .map_err(|e| {
                error!(event_type = %event_type, "amount sum query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })
    }

    async fn count_active_days(
        &self,
        tenant_id: &str,
        entity_id: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<u64> {
        let start = as_of - window;
        let sql = format!(
            "SELECT uniqExact(toDate(event_timestamp)) FROM {} \
             WHERE tenant_id = ? AND entity_id = ? \
             AND event_timestamp >= toDateTime(?) AND event_timestamp < toDateTime(?)",
            self.table
        );

        self.client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(entity_id)
            .bind(start.timestamp())
            .bind(as_of.timestamp())
            .fetch_one::<u64>()
            .await
            .map_err(|e| {
                error!("active-days query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })
    }

    async fn last_event_at(
        &self,
        tenant_id: &str,
        entity_id: &str,
        as_of: DateTime<Utc>,
    ) -> DomainResult<Option<DateTime<Utc>>> {
        // max() over an empty set yields the DateTime default (epoch), which
        // maps to "no events".
        let sql = format!(
            "SELECT toUnixTimestamp(max(event_timestamp)) FROM {} \
             WHERE tenant_id = ? AND entity_id = ? AND event_timestamp < toDateTime(?)",
            self.table
        );

        let epoch = self
            .client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(entity_id)
            .bind(as_of.timestamp())
            .fetch_one::<u32>()
            .await
            .map_err(|e| {
                error!("last-event query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        if epoch == 0 {
            return Ok(None);
        }
        Ok(Utc.timestamp_opt(i64::from(epoch), 0).single())
    }

    async fn active_tenants(
        &self,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<Vec<String>> {
        let start = as_of - window;
        let sql = format!(
            "SELECT DISTINCT tenant_id FROM {} \
             WHERE event_timestamp >= toDateTime(?) AND event_timestamp < toDateTime(?) \
             ORDER BY tenant_id",
            self.table
        );

        self.client
            .get_client()
            .query(&sql)
            .bind(start.timestamp())
            .bind(as_of.timestamp())
            .fetch_all::<String>()
            .await
            .map_err(|e| {
                error!("tenant discovery query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })
    }

    async fn active_entities(
        &self,
        tenant_id: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<Vec<String>> {
        let start = as_of - window;
        let sql = format!(
            "SELECT DISTINCT entity_id FROM {} \
             WHERE tenant_id = ? \
             AND event_timestamp >= toDateTime(?) AND event_timestamp < toDateTime(?) \
             ORDER BY entity_id",
            self.table
        );

        self.client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(start.timestamp())
            .bind(as_of.timestamp())
            .fetch_all::<String>()
            .await
            .map_err(|e| {
                error!(tenant_id = %tenant_id, "entity discovery query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })
    }
}
