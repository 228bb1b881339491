use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::{DomainError, DomainResult, EventStoreClient, TrainingRun, TrainingRunRepository};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct TrainingRunRow {
    pub run_id: String,
    // Empty string = run covered all tenants
    pub tenant_id: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub end_date: DateTime<Utc>,
    pub status: String,
    pub triggers_seen: u64,
    pub sample_count: u64,
    pub error: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl From<&TrainingRun> for TrainingRunRow {
    fn from(run: &TrainingRun) -> Self {
        TrainingRunRow {
            run_id: run.run_id.clone(),
            tenant_id: run.tenant_id.clone().unwrap_or_default(),
            start_date: run.start_date,
            end_date: run.end_date,
            status: run.status.as_str().to_string(),
            triggers_seen: run.triggers_seen,
            sample_count: run.sample_count,
            error: run.error.clone().unwrap_or_default(),
            recorded_at: run.recorded_at,
        }
    }
}

/// Append-only run bookkeeping: one row per status transition, readers take
/// the latest row per run_id. ClickHouse has no cheap in-place update, so the
/// audit trail is event-sourced.
#[derive(Clone)]
pub struct ClickHouseTrainingRunRepository {
    client: EventStoreClient,
    table: String,
}

impl ClickHouseTrainingRunRepository {
    pub fn new(client: EventStoreClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl TrainingRunRepository for ClickHouseTrainingRunRepository {
    async fn record(&self, run: &TrainingRun) -> DomainResult<()> {
        let row = TrainingRunRow::from(run);

        let mut insert = self
            .client
            .get_client()
            .insert::<TrainingRunRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create run insert: {}", e);
                DomainError::RepositoryError(e.into())
            })?;

        insert.write(&row).await.map_err(|e| {
            error!("failed to write run row: {}", e);
            DomainError::RepositoryError(e.into())
        })?;

        insert.end().await.map_err(|e| {
            error!("failed to finalize run insert: {}", e);
            DomainError::RepositoryError(e.into())
        })?;

        debug!(run_id = %run.run_id, status = %row.status, "recorded run status");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RunStatus;

    #[test]
    fn run_to_row_defaults_optional_fields() {
        let run = TrainingRun {
            run_id: "run-1".to_string(),
            tenant_id: None,
            start_date: Utc::now(),
            end_date: Utc::now(),
            status: RunStatus::Running,
            triggers_seen: 0,
            sample_count: 0,
            error: None,
            recorded_at: Utc::now(),
        };

        let row: TrainingRunRow = (&run).into();
        assert_eq!(row.tenant_id, "");
        assert_eq!(row.error, "");
        assert_eq!(row.status, "running");
    }

    #[test]
    fn failed_run_carries_the_error_message() {
        let run = TrainingRun {
            run_id: "run-2".to_string(),
            tenant_id: Some("acme".to_string()),
            start_date: Utc::now(),
            end_date: Utc::now(),
            status: RunStatus::Failed,
            triggers_seen: 10,
            sample_count: 0,
            error: Some("event store unreachable".to_string()),
            recorded_at: Utc::now(),
        };

        let row: TrainingRunRow = (&run).into();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error, "event store unreachable");
        assert_eq!(row.triggers_seen, 10);
    }
}
