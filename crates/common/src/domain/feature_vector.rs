use crate::domain::feature::{EventAggregateRepository, FeatureRecord};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{instrument, warn};

pub const EVENT_CART_ADD: &str = "cart.add";
pub const EVENT_CHECKOUT: &str = "cart.checkout";
pub const EVENT_ORDER_COMPLETED: &str = "order.completed";
pub const EVENT_PAGE_VIEW: &str = "page.view";

/// Recency value for an entity with no events at all.
pub const DAYS_SINCE_LAST_EVENT_SENTINEL: f64 = 999.0;

/// Computes the fixed windowed feature set for one (tenant, entity) as of a
/// reference instant.
///
/// The aggregation job passes `as_of = now`; the training generator passes
/// the trigger timestamp so every feature is backward-looking from `t0`.
/// A single failing aggregate query is logged and defaulted (0 for counts
/// and sums, the recency sentinel for days-since) instead of failing the
/// whole vector.
pub struct FeatureVectorService {
    repository: Arc<dyn EventAggregateRepository>,
}

impl FeatureVectorService {
    pub fn new(repository: Arc<dyn EventAggregateRepository>) -> Self {
        Self { repository }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, entity_id = %entity_id))]
    pub async fn compute(
        &self,
        tenant_id: &str,
        entity_id: &str,
        as_of: DateTime<Utc>,
    ) -> BTreeMap<String, f64> {
        let d7 = Duration::days(7);
        let d30 = Duration::days(30);
        let d90 = Duration::days(90);

        let cart_adds_7d = self.count(tenant_id, entity_id, EVENT_CART_ADD, d7, as_of).await;
        let cart_adds_30d = self.count(tenant_id, entity_id, EVENT_CART_ADD, d30, as_of).await;
        let cart_adds_90d = self.count(tenant_id, entity_id, EVENT_CART_ADD, d90, as_of).await;
        let checkouts_30d = self.count(tenant_id, entity_id, EVENT_CHECKOUT, d30, as_of).await;
        let checkouts_90d = self.count(tenant_id, entity_id, EVENT_CHECKOUT, d90, as_of).await;
        let purchases_30d = self
            .count(tenant_id, entity_id, EVENT_ORDER_COMPLETED, d30, as_of)
            .await;
        let purchases_90d = self
            .count(tenant_id, entity_id, EVENT_ORDER_COMPLETED, d90, as_of)
            .await;
        let page_views_7d = self.count(tenant_id, entity_id, EVENT_PAGE_VIEW, d7, as_of).await;
        let page_views_30d = self.count(tenant_id, entity_id, EVENT_PAGE_VIEW, d30, as_of).await;

        let purchase_amount_sum_90d = self
            .sum(tenant_id, entity_id, EVENT_ORDER_COMPLETED, d90, as_of)
            .await;

        let active_days_30d = match self
            .repository
            .count_active_days(tenant_id, entity_id, d30, as_of)
            .await
        {
            Ok(n) => n as f64,
            Err(e) => {
                warn!(error = %e, "active-days aggregate failed, defaulting to 0");
                0.0
            }
        };

        let days_since_last_event = self.days_since_last_event(tenant_id, entity_id, as_of).await;

        // Derived ratios are computed client-side from the raw aggregates.
        // A zero denominator yields 0, never a division error.
        let avg_purchase_amount_90d = ratio(purchase_amount_sum_90d, purchases_90d);
        let cart_abandonment_rate_30d = if cart_adds_30d > 0.0 {
            (1.0 - checkouts_30d / cart_adds_30d).max(0.0)
        } else {
            0.0
        };
        let view_to_cart_rate_30d = ratio(cart_adds_30d, page_views_30d);

        BTreeMap::from([
            ("cart_adds_7d".to_string(), cart_adds_7d),
            ("cart_adds_30d".to_string(), cart_adds_30d),
            ("cart_adds_90d".to_string(), cart_adds_90d),
            ("checkouts_30d".to_string(), checkouts_30d),
            ("checkouts_90d".to_string(), checkouts_90d),
            ("purchases_30d".to_string(), purchases_30d),
            ("purchases_90d".to_string(), purchases_90d),
            ("page_views_7d".to_string(), page_views_7d),
            ("page_views_30d".to_string(), page_views_30d),
            ("purchase_amount_sum_90d".to_string(), purchase_amount_sum_90d),
            ("avg_purchase_amount_90d".to_string(), avg_purchase_amount_90d),
            ("active_days_30d".to_string(), active_days_30d),
            ("days_since_last_event".to_string(), days_since_last_event),
            (
                "cart_abandonment_rate_30d".to_string(),
                cart_abandonment_rate_30d,
            ),
            ("view_to_cart_rate_30d".to_string(), view_to_cart_rate_30d),
        ])
    }

    /// Compute and wrap into a full record ready for the serving store.
    pub async fn compute_record(
        &self,
        tenant_id: &str,
        entity_id: &str,
        as_of: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> FeatureRecord {
        let features = self.compute(tenant_id, entity_id, as_of).await;
        FeatureRecord {
            tenant_id: tenant_id.to_string(),
            entity_id: entity_id.to_string(),
            features,
            computed_at: as_of,
            ttl_seconds,
        }
    }

    async fn count(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> f64 {
        match self
            .repository
            .count_events(tenant_id, entity_id, event_type, window, as_of)
            .await
        {
            Ok(n) => n as f64,
            Err(e) => {
                warn!(event_type = %event_type, window_days = window.num_days(), error = %e, "count aggregate failed, defaulting to 0");
                0.0
            }
        }
    }

    async fn sum(
        &self,
        tenant_id: &str,
        entity_id: &str,
        event_type: &str,
        window: Duration,
        as_of: DateTime<Utc>,
    ) -> f64 {
        match self
            .repository
            .sum_amount(tenant_id, entity_id, event_type, window, as_of)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(event_type = %event_type, window_days = window.num_days(), error = %e, "sum aggregate failed, defaulting to 0");
                0.0
            }
        }
    }

    async fn days_since_last_event(
        &self,
        tenant_id: &str,
        entity_id: &str,
        as_of: DateTime<Utc>,
    ) -> f64 {
        match self.repository.last_event_at(tenant_id, entity_id, as_of).await {
            Ok(Some(last)) => ((as_of - last).num_seconds() as f64 / 86_400.0).floor(),
            Ok(None) => DAYS_SINCE_LAST_EVENT_SENTINEL,
            Err(e) => {
                warn!(error = %e, "last-event aggregate failed, defaulting to sentinel");
                DAYS_SINCE_LAST_EVENT_SENTINEL
            }
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
