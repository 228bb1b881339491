use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Schema version stamped on every generated sample. Bump when the feature
/// set or label definition changes so training code can partition runs.
pub const TRAINING_SCHEMA_VERSION: u32 = 2;

/// One point-in-time-correct (features, label) pair anchored at a trigger
/// event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub sample_id: String,
    pub tenant_id: String,
    pub entity_id: String,
    /// The trigger event's timestamp `t0`. Features are computed from events
    /// strictly before it, the label from `(t0, t0 + label_window]`.
    pub observation_timestamp: DateTime<Utc>,
    pub features: BTreeMap<String, f64>,
    pub label: bool,
    pub label_window_seconds: u64,
    pub purchased_at: Option<DateTime<Utc>>,
    pub purchase_amount: Option<f64>,
    pub generated_at: DateTime<Utc>,
    pub schema_version: u32,
}

/// Deterministic sample identity: the dedup key for re-runs.
///
/// Derived from (tenant, trigger event, schema version) so regenerating the
/// same date range produces the same ids and duplicates can be skipped.
pub fn sample_id(tenant_id: &str, trigger_event_id: &str, schema_version: u32) -> String {
    let name = format!("{tenant_id}/{trigger_event_id}/{schema_version}");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Audit record for one generator invocation. The runs table is
/// append-only: one row per status transition, readers take the latest row
/// per `run_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    /// `None` means the run covered every tenant active in the range.
    pub tenant_id: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: RunStatus,
    pub triggers_seen: u64,
    pub sample_count: u64,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A trigger event selected from the raw log, deduplicated by event id.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub event_id: String,
    pub entity_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// The first qualifying outcome event inside a label window.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatch {
    pub occurred_at: DateTime<Utc>,
    pub amount: Option<f64>,
}

/// Trigger/label selection over the raw event log. Only the training
/// generator reads the log this way.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventHistoryRepository: Send + Sync {
    /// Trigger events of one type in `[start, end)`, deduplicated by
    /// event id, ordered by timestamp.
    async fn trigger_events(
        &self,
        tenant_id: &str,
        event_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<TriggerEvent>>;

    /// First event of one type in `(after, until]` for an entity.
    async fn first_label_event(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DomainResult<Option<LabelMatch>>;

    /// Tenants with at least one event in `[start, end)`.
    async fn active_tenants_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<String>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TrainingSampleRepository: Send + Sync {
    async fn insert_samples(&self, samples: &[TrainingSample]) -> DomainResult<()>;

    /// Sample ids already present for a tenant and observation range; used
    /// to make re-runs idempotent.
    async fn existing_sample_ids(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<HashSet<String>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TrainingRunRepository: Send + Sync {
    /// Append one status row for the run.
    async fn record(&self, run: &TrainingRun) -> DomainResult<()>;
}
