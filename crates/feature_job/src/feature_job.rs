use crate::stats::AggregationStats;
use chrono::{DateTime, Utc};
use common::{EventAggregateRepository, FeatureRecord, FeatureStore, FeatureVectorService};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct FeatureJobConfig {
    /// Fixed sleep between cycles. A slow cycle delays, never skips, the
    /// next one.
    pub cycle_interval: Duration,
    /// Discovery horizon: an entity with no events inside it is skipped
    /// this cycle, not deleted.
    pub active_window: chrono::Duration,
    /// Per-record expiry handed to the feature store.
    pub feature_ttl_seconds: u64,
}

/// The scheduled aggregation loop: discover active tenants and entities,
/// compute each entity's feature vector, upsert into the serving store.
///
/// Re-running a cycle over an unchanged event window republishes identical
/// records; concurrent workers are safe because the store is
/// last-write-wins per (tenant, entity).
pub struct FeatureAggregationJob {
    aggregates: Arc<dyn EventAggregateRepository>,
    vectors: FeatureVectorService,
    store: Arc<dyn FeatureStore>,
    stats: Arc<AggregationStats>,
    config: FeatureJobConfig,
}

impl FeatureAggregationJob {
    pub fn new(
        aggregates: Arc<dyn EventAggregateRepository>,
        store: Arc<dyn FeatureStore>,
        stats: Arc<AggregationStats>,
        config: FeatureJobConfig,
    ) -> Self {
        let vectors = FeatureVectorService::new(aggregates.clone());
        Self {
            aggregates,
            vectors,
            store,
            stats,
            config,
        }
    }

    /// Cancellable periodic task: cycle, then sleep, until shutdown.
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(
            interval_secs = self.config.cycle_interval.as_secs(),
            "starting feature aggregation loop"
        );

        loop {
            if ctx.is_cancelled() {
                break;
            }

            self.run_cycle(Utc::now()).await;

            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("received shutdown signal, stopping aggregation loop");
                    break;
                }
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
        }

        info!("feature aggregation loop stopped");
        Ok(())
    }

    /// One full pass over every active tenant and entity.
    ///
    /// Parameterized on the reference instant so tests (and re-runs) can pin
    /// the window.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, as_of: DateTime<Utc>) {
        let tenants = match self
            .aggregates
            .active_tenants(self.config.active_window, as_of)
            .await
        {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(error = %e, "tenant discovery failed, skipping cycle");
                self.stats.incr_cycle_errors();
                return;
            }
        };

        debug!(tenant_count = tenants.len(), "discovered active tenants");
        self.stats.add_tenants_discovered(tenants.len() as u64);

        for tenant_id in &tenants {
            self.aggregate_tenant(tenant_id, as_of).await;
        }

        self.stats.incr_cycles_completed();
        info!(tenant_count = tenants.len(), "aggregation cycle completed");
    }

    async fn aggregate_tenant(&self, tenant_id: &str, as_of: DateTime<Utc>) {
        let entities = match self
            .aggregates
            .active_entities(tenant_id, self.config.active_window, as_of)
            .await
        {
            Ok(entities) => entities,
            Err(e) => {
                error!(tenant_id = %tenant_id, error = %e, "entity discovery failed, skipping tenant this cycle");
                self.stats.incr_cycle_errors();
                return;
            }
        };

        debug!(tenant_id = %tenant_id, entity_count = entities.len(), "discovered active entities");

        for entity_id in &entities {
            self.stats.incr_entities_processed();

            let record = self
                .vectors
                .compute_record(tenant_id, entity_id, as_of, self.config.feature_ttl_seconds)
                .await;

            // One in-cycle retry per entity; after that the entity waits for
            // the next scheduled cycle.
            if self.store_with_retry(&record).await {
                self.stats.incr_records_upserted();
            } else {
                self.stats.incr_entity_errors();
            }
        }
    }

    async fn store_with_retry(&self, record: &FeatureRecord) -> bool {
        match self.store.put(record).await {
            Ok(()) => return true,
            Err(e) => {
                warn!(
                    tenant_id = %record.tenant_id,
                    entity_id = %record.entity_id,
                    error = %e,
                    "feature upsert failed, retrying once"
                );
            }
        }

        match self.store.put(record).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    tenant_id = %record.tenant_id,
                    entity_id = %record.entity_id,
                    error = %e,
                    "feature upsert failed after retry, deferring to next cycle"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DomainError, MockEventAggregateRepository, MockFeatureStore};
    use std::sync::Mutex;

    fn as_of() -> DateTime<Utc> {
        "2026-05-01T06:00:00Z".parse().unwrap()
    }

    fn config() -> FeatureJobConfig {
        FeatureJobConfig {
            cycle_interval: Duration::from_secs(3600),
            active_window: chrono::Duration::days(30),
            feature_ttl_seconds: 7200,
        }
    }

    /// Aggregates for one tenant "acme" with the given entities; every
    /// aggregate query returns a fixed small value.
    fn aggregates_for(entities: Vec<&str>) -> MockEventAggregateRepository {
        let entities: Vec<String> = entities.into_iter().map(String::from).collect();
        let mut mock = MockEventAggregateRepository::new();
        mock.expect_active_tenants()
            .returning(|_, _| Ok(vec!["acme".to_string()]));
        mock.expect_active_entities()
            .returning(move |_, _, _| Ok(entities.clone()));
        mock.expect_count_events().returning(|_, _, _, _, _| Ok(3));
        mock.expect_sum_amount().returning(|_, _, _, _, _| Ok(42.0));
        mock.expect_count_active_days().returning(|_, _, _, _| Ok(2));
        mock.expect_last_event_at()
            .returning(|_, _, as_of| Ok(Some(as_of - chrono::Duration::days(1))));
        mock
    }

    #[tokio::test]
    async fn cycle_upserts_one_record_per_active_entity() {
        let aggregates = aggregates_for(vec!["user-1", "user-2"]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut store = MockFeatureStore::new();
        {
            let seen = seen.clone();
            store.expect_put().times(2).returning(move |record| {
                seen.lock().unwrap().push(record.clone());
                Ok(())
            });
        }

        let stats = Arc::new(AggregationStats::default());
        let job = FeatureAggregationJob::new(
            Arc::new(aggregates),
            Arc::new(store),
            stats.clone(),
            config(),
        );

        job.run_cycle(as_of()).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].entity_id, "user-1");
        assert_eq!(seen[1].entity_id, "user-2");
        assert!(seen.iter().all(|r| r.tenant_id == "acme"));
        assert!(seen.iter().all(|r| r.ttl_seconds == 7200));
        assert!(seen.iter().all(|r| r.computed_at == as_of()));

        assert_eq!(stats.cycles_completed(), 1);
        assert_eq!(stats.entities_processed(), 2);
        assert_eq!(stats.records_upserted(), 2);
        assert_eq!(stats.entity_errors(), 0);
    }

    #[tokio::test]
    async fn failed_upsert_is_retried_once_then_counted() {
        let aggregates = aggregates_for(vec!["user-1", "user-2"]);

        let mut store = MockFeatureStore::new();
        // user-1 fails both attempts, user-2 succeeds first try.
        store
            .expect_put()
            .withf(|record: &FeatureRecord| record.entity_id == "user-1")
            .times(2)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("kv down"))));
        store
            .expect_put()
            .withf(|record: &FeatureRecord| record.entity_id == "user-2")
            .times(1)
            .returning(|_| Ok(()));

        let stats = Arc::new(AggregationStats::default());
        let job = FeatureAggregationJob::new(
            Arc::new(aggregates),
            Arc::new(store),
            stats.clone(),
            config(),
        );

        job.run_cycle(as_of()).await;

        // The failed entity never blocks the rest of the cycle.
        assert_eq!(stats.entities_processed(), 2);
        assert_eq!(stats.records_upserted(), 1);
        assert_eq!(stats.entity_errors(), 1);
        assert_eq!(stats.cycles_completed(), 1);
    }

    #[tokio::test]
    async fn tenant_discovery_failure_skips_the_cycle() {
        let mut aggregates = MockEventAggregateRepository::new();
        aggregates.expect_active_tenants().times(1).returning(|_, _| {
            Err(DomainError::RepositoryError(anyhow::anyhow!(
                "store unreachable"
            )))
        });

        let stats = Arc::new(AggregationStats::default());
        let job = FeatureAggregationJob::new(
            Arc::new(aggregates),
            Arc::new(MockFeatureStore::new()),
            stats.clone(),
            config(),
        );

        job.run_cycle(as_of()).await;

        assert_eq!(stats.cycles_completed(), 0);
        assert_eq!(stats.cycle_errors(), 1);
    }

    #[tokio::test]
    async fn entity_discovery_failure_only_skips_that_tenant() {
        let mut aggregates = MockEventAggregateRepository::new();
        aggregates
            .expect_active_tenants()
            .returning(|_, _| Ok(vec!["acme".to_string(), "globex".to_string()]));
        aggregates
            .expect_active_entities()
            .withf(|tenant: &str, _, _| tenant == "acme")
            .returning(|_, _, _| Err(DomainError::RepositoryError(anyhow::anyhow!("timeout"))));
        aggregates
            .expect_active_entities()
            .withf(|tenant: &str, _, _| tenant == "globex")
            .returning(|_, _, _| Ok(vec!["user-9".to_string()]));
        aggregates.expect_count_events().returning(|_, _, _, _, _| Ok(0));
        aggregates.expect_sum_amount().returning(|_, _, _, _, _| Ok(0.0));
        aggregates
            .expect_count_active_days()
            .returning(|_, _, _, _| Ok(0));
        aggregates.expect_last_event_at().returning(|_, _, _| Ok(None));

        let mut store = MockFeatureStore::new();
        store
            .expect_put()
            .withf(|record: &FeatureRecord| record.tenant_id == "globex")
            .times(1)
            .returning(|_| Ok(()));

        let stats = Arc::new(AggregationStats::default());
        let job = FeatureAggregationJob::new(
            Arc::new(aggregates),
            Arc::new(store),
            stats.clone(),
            config(),
        );

        job.run_cycle(as_of()).await;

        assert_eq!(stats.records_upserted(), 1);
        assert_eq!(stats.cycle_errors(), 1);
        assert_eq!(stats.cycles_completed(), 1);
    }

    #[tokio::test]
    async fn back_to_back_cycles_over_an_unchanged_window_publish_identical_records() {
        let aggregates = aggregates_for(vec!["user-1"]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut store = MockFeatureStore::new();
        {
            let seen = seen.clone();
            store.expect_put().times(2).returning(move |record| {
                seen.lock().unwrap().push(record.clone());
                Ok(())
            });
        }

        let job = FeatureAggregationJob::new(
            Arc::new(aggregates),
            Arc::new(store),
            Arc::new(AggregationStats::default()),
            config(),
        );

        job.run_cycle(as_of()).await;
        job.run_cycle(as_of()).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], seen[1]);
        assert_eq!(
            serde_json::to_vec(&seen[0]).unwrap(),
            serde_json::to_vec(&seen[1]).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_cancellation() {
        let mut aggregates = MockEventAggregateRepository::new();
        aggregates
            .expect_active_tenants()
            .returning(|_, _| Ok(vec![]));

        let job = FeatureAggregationJob::new(
            Arc::new(aggregates),
            Arc::new(MockFeatureStore::new()),
            Arc::new(AggregationStats::default()),
            config(),
        );

        let token = CancellationToken::new();
        let handle = tokio::spawn(job.run(token.clone()));

        // Let the first cycle complete, then cancel during the sleep.
        tokio::task::yield_now().await;
        token.cancel();

        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
}
