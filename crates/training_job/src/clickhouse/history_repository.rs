use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::Row;
use common::{
    DomainError, DomainResult, EventHistoryRepository, EventStoreClient, LabelMatch, TriggerEvent,
};
use serde::Deserialize;
use tracing::{debug, error};

#[derive(Debug, Row, Deserialize)]
struct TriggerEventRow {
    event_id: String,
    entity_id: String,
    occurred_at: u32,
}

#[derive(Debug, Row, Deserialize)]
struct LabelEventRow {
    occurred_at: u32,
    amount: Option<f64>,
}

/// Trigger and label selection over the raw event log.
///
/// Selection is dedup-safe against at-least-once redelivery: `LIMIT 1 BY
/// event_id` collapses duplicate deliveries of the same trigger.
#[derive(Clone)]
pub struct ClickHouseEventHistoryRepository {
    client: EventStoreClient,
    table: String,
}

impl ClickHouseEventHistoryRepository {
    pub fn new(client: EventStoreClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl EventHistoryRepository for ClickHouseEventHistoryRepository {
    async fn trigger_events(
        &self,
        tenant_id: &str,
        event_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<TriggerEvent>> {
        let sql = format!(
            "SELECT event_id, entity_id, toUnixTimestamp(event_timestamp) AS occurred_at \
             FROM {} \
             WHERE tenant_id = ? AND event_type = ? \
             AND event_timestamp >= toDateTime(?) AND event_timestamp < toDateTime(?) \
             ORDER BY event_timestamp, event_id \
             LIMIT 1 BY event_id",
            self.table
        );

        let rows = self
            .client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(event_type)
            .bind(start.timestamp())
            .bind(end.timestamp())
            .fetch_all::<TriggerEventRow>()
            .await
            .map_err(|e| {
                error!(event_type = %event_type, "trigger selection query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        debug!(
            tenant_id = %tenant_id,
            trigger_count = rows.len(),
            "selected trigger events"
        );

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Utc.timestamp_opt(i64::from(row.occurred_at), 0)
                    .single()
                    .map(|occurred_at| TriggerEvent {
                        event_id: row.event_id,
                        entity_id: row.entity_id,
                        occurred_at,
                    })
            })
            .collect())
    }

    async fn first_label_event(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DomainResult<Option<LabelMatch>> {
        // Strict lower bound, inclusive upper bound: (t0, t0 + window].
        let sql = format!(
            "SELECT toUnixTimestamp(event_timestamp) AS occurred_at, \
             if(JSONHas(payload, 'amount'), JSONExtractFloat(payload, 'amount'), NULL) AS amount \
             FROM {} \
             WHERE tenant_id = ? AND entity_id = ? AND event_type = ? \
             AND event_timestamp > toDateTime(?) AND event_timestamp <= toDateTime(?) \
             ORDER BY event_timestamp \
             LIMIT 1",
            self.table
        );

        let row = self
            .client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(entity_id)
            .bind(event_type)
            .bind(after.timestamp())
            .bind(until.timestamp())
            .fetch_optional::<LabelEventRow>()
            .await
            .map_err(|e| {
                error!(event_type = %event_type, "label lookup query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        Ok(row.and_then(|row| {
            Utc.timestamp_opt(i64::from(row.occurred_at), 0)
                .single()
                .map(|occurred_at| LabelMatch {
                    occurred_at,
                    amount: row.amount,
                })
        }))
    }

    async fn active_tenants_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<String>> {
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
            .bind(end.timestamp())
            .fetch_all::<String>()
            .await
            .map_err(|e| {
                error!("tenant discovery query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })
    }
}
