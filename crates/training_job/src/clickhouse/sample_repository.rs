use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::{
    DomainError, DomainResult, EventStoreClient, TrainingSample, TrainingSampleRepository,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error};

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct TrainingSampleRow {
    pub sample_id: String,
    pub tenant_id: String,
    pub entity_id: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub observation_timestamp: DateTime<Utc>,
    // Named numeric feature fields stored as a JSON string column
    pub features: String,
    pub label: u8,
    pub label_window_seconds: u64,
    #[serde(with = "clickhouse::serde::chrono::datetime::option")]
    pub purchased_at: Option<DateTime<Utc>>,
    pub purchase_amount: Option<f64>,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub generated_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl From<&TrainingSample> for TrainingSampleRow {
    fn from(sample: &TrainingSample) -> Self {
        let features_json =
            serde_json::to_string(&sample.features).unwrap_or_else(|_| "{}".to_string());

        TrainingSampleRow {
            sample_id: sample.sample_id.clone(),
            tenant_id: sample.tenant_id.clone(),
            entity_id: sample.entity_id.clone(),
            observation_timestamp: sample.observation_timestamp,
            features: features_json,
            label: u8::from(sample.label),
            label_window_seconds: sample.label_window_seconds,
            purchased_at: sample.purchased_at,
            purchase_amount: sample.purchase_amount,
            generated_at: sample.generated_at,
            schema_version: sample.schema_version,
        }
    }
}

/// ClickHouse implementation of TrainingSampleRepository
#[derive(Clone)]
pub struct ClickHouseTrainingSampleRepository {
    client: EventStoreClient,
    table: String,
}

impl ClickHouseTrainingSampleRepository {
    pub fn new(client: EventStoreClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl TrainingSampleRepository for ClickHouseTrainingSampleRepository {
    async fn insert_samples(&self, samples: &[TrainingSample]) -> DomainResult<()> {
        if samples.is_empty() {
            debug!("no samples to insert, skipping");
            return Ok(());
        }

        debug!(
            sample_count = samples.len(),
            table = %self.table,
            "inserting training samples"
        );

        let rows: Vec<TrainingSampleRow> = samples.iter().map(|sample| sample.into()).collect();

        let mut insert = self
            .client
            .get_client()
            .insert::<TrainingSampleRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create sample insert: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        for row in &rows {
            insert.write(row).await.map_err(|e| {
                error!("failed to write sample row: {}", e);
                DomainError::RepositoryError(e.into())
            })?;
        }

        insert.end().await.map_err(|e| {
            error!("failed to finalize sample insert: {}", e);
            DomainError::RepositoryError(e.into())
        })?;

        debug!(rows_inserted = rows.len(), "inserted training samples");

        Ok(())
    }

    async fn existing_sample_ids(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<HashSet<String>> {
        let sql = format!(
            "SELECT DISTINCT sample_id FROM {} \
             WHERE tenant_id = ? \
             AND observation_timestamp >= toDateTime(?) AND observation_timestamp < toDateTime(?)",
            self.table
        );

        let ids = self
            .client
            .get_client()
            .query(&sql)
            .bind(tenant_id)
            .bind(start.timestamp())
            .bind(end.timestamp())
            .fetch_all::<String>()
            .await
            .map_err(|e| {
                error!("existing-sample query failed: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        Ok(ids.into_iter().collect())
    }
}
