use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::{DomainError, DomainResult, EventStoreClient, RawEvent, RawEventRepository, StoreEventsInput};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct RawEventRow {
    pub event_id: String,
    pub tenant_id: String,
    pub entity_id: String,
    pub event_type: String,
    pub source_topic: String,
    // Open payload map stored as a JSON string column
    pub payload: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub event_timestamp: DateTime<Utc>,
    pub ingest_partition: u32,
    pub ingest_offset: u64,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub ingested_at: DateTime<Utc>,
}

impl From<&RawEvent> for RawEventRow {
    fn from(event: &RawEvent) -> Self {
        let payload_json =
            serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());

        RawEventRow {
            event_id: event.event_id.clone(),
            tenant_id: event.tenant_id.clone(),
            entity_id: event.entity_id.clone(),
            event_type: event.event_type.clone(),
            source_topic: event.source_topic.clone(),
            payload: payload_json,
            event_timestamp: event.event_timestamp,
            ingest_partition: event.ingest_partition,
            ingest_offset: event.ingest_offset,
            ingested_at: event.ingested_at,
        }
    }
}

/// ClickHouse implementation of RawEventRepository
#[derive(Clone)]
pub struct ClickHouseRawEventRepository {
    client: EventStoreClient,
    table: String,
}

impl ClickHouseRawEventRepository {
    pub fn new(client: EventStoreClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl RawEventRepository for ClickHouseRawEventRepository {
    async fn store_batch(&self, input: StoreEventsInput) -> DomainResult<()> {
        if input.events.is_empty() {
            debug!("no events to store, skipping");
            return Ok(());
        }

        debug!(
            event_count = input.events.len(),
            table = %self.table,
            "storing event batch"
        );

        let rows: Vec<RawEventRow> = input.events.iter().map(|event| event.into()).collect();

        let mut insert = self
            .client
            .get_client()
            .insert::<RawEventRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create event batch insert: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        for row in &rows {
            insert.write(row).await.map_err(|e| {
                error!("failed to write event row: {}", e);
                DomainError::RepositoryError(e.into())
            })?;
        }

        insert.end().await.map_err(|e| {
            error!("failed to finalize event batch insert: {}", e);
            DomainError::RepositoryError(e.into())
        })?;

        debug!(rows_inserted = rows.len(), "stored event batch");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_to_row_serializes_payload_as_json() {
        let mut payload = serde_json::Map::new();
        payload.insert("sku".to_string(), serde_json::json!("A-100"));
        payload.insert("quantity".to_string(), serde_json::json!(2));

        let event = RawEvent {
            event_id: "evt-1".to_string(),
            tenant_id: "acme".to_string(),
            entity_id: "user-42".to_string(),
            event_type: "cart.add".to_string(),
            source_topic: "events.web".to_string(),
            payload,
            event_timestamp: Utc::now(),
            ingest_partition: 0,
            ingest_offset: 99,
            ingested_at: Utc::now(),
        };

        let row: RawEventRow = (&event).into();

        assert_eq!(row.event_id, "evt-1");
        assert_eq!(row.ingest_offset, 99);
        assert!(row.payload.contains("A-100"));
        assert!(row.payload.contains("quantity"));
    }

    #[test]
    fn empty_payload_becomes_empty_object() {
        let event = RawEvent {
            event_id: "evt-1".to_string(),
            tenant_id: "acme".to_string(),
            entity_id: "user-42".to_string(),
            event_type: "page.view".to_string(),
            source_topic: "events.web".to_string(),
            payload: serde_json::Map::new(),
            event_timestamp: Utc::now(),
            ingest_partition: 0,
            ingest_offset: 1,
            ingested_at: Utc::now(),
        };

        let row: RawEventRow = (&event).into();
        assert_eq!(row.payload, "{}");
    }
}
