use chrono::{DateTime, Utc};
use common::{
    sample_id, DomainError, DomainResult, EventAggregateRepository, EventHistoryRepository,
    FeatureVectorService, RunStatus, TrainingRun, TrainingRunRepository, TrainingSample,
    TrainingSampleRepository, TRAINING_SCHEMA_VERSION,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub struct GeneratorConfig {
    /// Event type anchoring a sample's observation timestamp.
    pub trigger_event_type: String,
    /// Event type that makes a sample positive when it lands in the window.
    pub label_event_type: String,
    /// Forward-looking horizon for the label.
    pub label_window: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct RunParams {
    /// `None` runs every tenant active in the range.
    pub tenant_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub tenants_processed: u64,
    pub triggers_seen: u64,
    pub samples_written: u64,
}

/// Batch generator of point-in-time-correct (features, label) pairs.
///
/// The temporal contract: for a trigger at `t0`, features come only from
/// events with `event_timestamp < t0` (the aggregate repository's strict
/// upper bound), and the label only from `(t0, t0 + label_window]`. Either
/// bound slipping corrupts the training signal.
pub struct TrainingSampleGenerator {
    history: Arc<dyn EventHistoryRepository>,
    vectors: FeatureVectorService,
    samples: Arc<dyn TrainingSampleRepository>,
    runs: Arc<dyn TrainingRunRepository>,
    config: GeneratorConfig,
}

impl TrainingSampleGenerator {
    pub fn new(
        history: Arc<dyn EventHistoryRepository>,
        aggregates: Arc<dyn EventAggregateRepository>,
        samples: Arc<dyn TrainingSampleRepository>,
        runs: Arc<dyn TrainingRunRepository>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            history,
            vectors: FeatureVectorService::new(aggregates),
            samples,
            runs,
            config,
        }
    }

    /// Execute one generation run with audit bookkeeping:
    /// `running → completed` on success, `running → failed` with the error
    /// message otherwise.
    #[instrument(skip(self), fields(start = %params.start, end = %params.end))]
    pub async fn run(&self, params: RunParams) -> DomainResult<RunSummary> {
        if params.start >= params.end {
            return Err(DomainError::InvalidDateRange(format!(
                "start {} is not before end {}",
                params.start, params.end
            )));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, tenant_id = ?params.tenant_id, "starting training sample run");

        let mut run = TrainingRun {
            run_id: run_id.clone(),
            tenant_id: params.tenant_id.clone(),
            start_date: params.start,
            end_date: params.end,
            status: RunStatus::Running,
            triggers_seen: 0,
            sample_count: 0,
            error: None,
            recorded_at: Utc::now(),
        };
        self.runs.record(&run).await?;

        match self.generate(&params).await {
            Ok(summary) => {
                run.status = RunStatus::Completed;
                run.triggers_seen = summary.1;
                run.sample_count = summary.2;
                run.recorded_at = Utc::now();
                self.runs.record(&run).await?;

                info!(
                    run_id = %run_id,
                    triggers_seen = summary.1,
                    samples_written = summary.2,
                    "training sample run completed"
                );
                Ok(RunSummary {
                    run_id,
                    tenants_processed: summary.0,
                    triggers_seen: summary.1,
                    samples_written: summary.2,
                })
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "training sample run failed");
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
                run.recorded_at = Utc::now();
                // The failure status row is best-effort; the original error
                // is the one worth surfacing.
                if let Err(record_err) = self.runs.record(&run).await {
                    error!(run_id = %run_id, error = %record_err, "failed to record run failure");
                }
                Err(e)
            }
        }
    }

    async fn generate(&self, params: &RunParams) -> DomainResult<(u64, u64, u64)> {
        let tenants = match &params.tenant_id {
            Some(tenant_id) => vec![tenant_id.clone()],
            None => {
                self.history
                    .active_tenants_in_range(params.start, params.end)
                    .await?
            }
        };

        let mut triggers_seen = 0;
        let mut samples_written = 0;
        for tenant_id in &tenants {
            let (triggers, samples) = self.generate_for_tenant(tenant_id, params).await?;
            triggers_seen += triggers;
            samples_written += samples;
        }

        Ok((tenants.len() as u64, triggers_seen, samples_written))
    }

    #[instrument(skip(self, params), fields(tenant_id = %tenant_id))]
    async fn generate_for_tenant(
        &self,
        tenant_id: &str,
        params: &RunParams,
    ) -> DomainResult<(u64, u64)> {
        let triggers = self
            .history
            .trigger_events(
                tenant_id,
                &self.config.trigger_event_type,
                params.start,
                params.end,
            )
            .await?;

        // Deterministic sample ids make re-runs idempotent: triggers already
        // sampled in a previous run for this range are skipped.
        let existing = self
            .samples
            .existing_sample_ids(tenant_id, params.start, params.end)
            .await?;

        debug!(
            trigger_count = triggers.len(),
            existing_count = existing.len(),
            "selected trigger events"
        );

        let generated_at = Utc::now();
        let mut batch = Vec::new();

        for trigger in &triggers {
            let id = sample_id(tenant_id, &trigger.event_id, TRAINING_SCHEMA_VERSION);
            if existing.contains(&id) {
                debug!(event_id = %trigger.event_id, "sample already exists, skipping");
                continue;
            }

            let t0 = trigger.occurred_at;

            // Features: strictly before t0.
            let features = self.vectors.compute(tenant_id, &trigger.entity_id, t0).await;

            // Label: first qualifying event in (t0, t0 + window].
            let label_match = self
                .history
                .first_label_event(
                    tenant_id,
                    &trigger.entity_id,
                    &self.config.label_event_type,
                    t0,
                    t0 + self.config.label_window,
                )
                .await?;

            batch.push(TrainingSample {
                sample_id: id,
                tenant_id: tenant_id.to_string(),
                entity_id: trigger.entity_id.clone(),
                observation_timestamp: t0,
                features,
                label: label_match.is_some(),
                label_window_seconds: self.config.label_window.num_seconds().max(0) as u64,
                purchased_at: label_match.as_ref().map(|m| m.occurred_at),
                purchase_amount: label_match.as_ref().and_then(|m| m.amount),
                generated_at,
                schema_version: TRAINING_SCHEMA_VERSION,
            });
        }

        if !batch.is_empty() {
            self.samples.insert_samples(&batch).await?;
        }

        Ok((triggers.len() as u64, batch.len() as u64))
    }
}
