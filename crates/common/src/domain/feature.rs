use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One logical feature record per (tenant, entity).
///
/// Overwritten wholesale on every aggregation cycle so the record always
/// reflects a single consistent snapshot; never merged field-by-field.
/// Expires `ttl_seconds` after the last refresh — an entity with no recent
/// activity silently falls out of the serving store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub tenant_id: String,
    pub entity_id: String,
    /// Ordered so serialization is deterministic across recomputations.
    pub features: BTreeMap<String, f64>,
    pub computed_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Point lookups and upserts with expiry against the serving store.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Full-record overwrite, last-write-wins per (tenant, entity).
    async fn put(&self, record: &FeatureRecord) -> DomainResult<()>;

    /// Returns `None` both for never-written and expired records.
    async fn get(&self, tenant_id: &str, entity_id: &str) -> DomainResult<Option<FeatureRecord>>;
}

/// Windowed aggregate reads over the raw event log.
///
/// Every window is `[as_of - window, as_of)` with a strict upper bound so the
/// same queries serve both the aggregation job (`as_of = now`) and the
/// training generator (`as_of = t0`, where including `t0` itself would leak
/// the trigger into its own features). All counts deduplicate by `event_id`
/// because the bus delivers at-least-once.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventAggregateRepository: Send + Sync {
    /// Distinct events of one type in the window.
    async fn count_events(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<u64>;

    /// Sum of `payload.amount` over distinct events of one type in the window.
    async fn sum_amount(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<f64>;

    /// Distinct calendar days with at least one event in the window.
    async fn count_active_days(
        &self,
        tenant_id: &str,
        entity_id: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<u64>;

    /// Timestamp of the most recent event strictly before `as_of`, any type.
    async fn last_event_at(
        &self,
        tenant_id: &str,
        entity_id: &str,
        as_of: DateTime<Utc>,
    ) -> DomainResult<Option<DateTime<Utc>>>;

    /// Tenants with at least one event in the window.
    async fn active_tenants(
        &self,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<Vec<String>>;

    /// Entities of one tenant with at least one event in the window.
    async fn active_entities(
        &self,
        tenant_id: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> DomainResult<Vec<String>>;
}
