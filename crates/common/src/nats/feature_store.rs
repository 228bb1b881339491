use crate::domain::{DomainError, DomainResult, FeatureRecord, FeatureStore};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Key-value feature store backed by a JetStream KV bucket.
///
/// Expiry is the bucket's `max_age`: every put resets the entry's age, so a
/// record that keeps being refreshed stays served while an idle entity's
/// record lapses after the TTL. Values are the JSON-serialized record.
pub struct NatsKvFeatureStore {
    store: jetstream::kv::Store,
}

impl NatsKvFeatureStore {
    /// Get or create the bucket with the given per-entry TTL.
    pub async fn new(jetstream: &jetstream::Context, bucket_name: &str, ttl: Duration) -> Result<Self> {
        debug!(bucket = %bucket_name, ttl_secs = ttl.as_secs(), "initializing feature store bucket");

        let store = match jetstream.get_key_value(bucket_name).await {
            Ok(store) => {
                debug!(bucket = %bucket_name, "feature store bucket already exists");
                store
            }
            Err(_) => {
                debug!(bucket = %bucket_name, "creating feature store bucket");
                jetstream
                    .create_key_value(jetstream::kv::Config {
                        bucket: bucket_name.to_string(),
                        max_age: ttl,
                        ..Default::default()
                    })
                    .await
                    .context("failed to create feature store bucket")?
            }
        };

        Ok(Self { store })
    }
}

fn feature_key(tenant_id: &str, entity_id: &str) -> String {
    format!("{tenant_id}.{entity_id}")
}

#[async_trait]
impl FeatureStore for NatsKvFeatureStore {
    async fn put(&self, record: &FeatureRecord) -> DomainResult<()> {
        let key = feature_key(&record.tenant_id, &record.entity_id);
        let payload =
            serde_json::to_vec(record).map_err(|e| DomainError::RepositoryError(e.into()))?;

        self.store
            .put(&key, payload.into())
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(key = %key, feature_count = record.features.len(), "stored feature record");
        Ok(())
    }

    async fn get(&self, tenant_id: &str, entity_id: &str) -> DomainResult<Option<FeatureRecord>> {
        let key = feature_key(tenant_id, entity_id);

        match self.store.get(&key).await {
            Ok(Some(bytes)) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| DomainError::RepositoryError(e.into()))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DomainError::RepositoryError(e.into())),
        }
    }
}
