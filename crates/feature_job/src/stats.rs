use common::StatsProvider;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters exposed on `/stats`.
#[derive(Debug, Default)]
pub struct AggregationStats {
    cycles_completed: AtomicU64,
    cycle_errors: AtomicU64,
    tenants_discovered: AtomicU64,
    entities_processed: AtomicU64,
    entity_errors: AtomicU64,
    records_upserted: AtomicU64,
}

impl AggregationStats {
    pub fn incr_cycles_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_cycle_errors(&self) {
        self.cycle_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tenants_discovered(&self, n: u64) {
        self.tenants_discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_entities_processed(&self) {
        self.entities_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_entity_errors(&self) {
        self.entity_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_records_upserted(&self) {
        self.records_upserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycle_errors(&self) -> u64 {
        self.cycle_errors.load(Ordering::Relaxed)
    }

    pub fn tenants_discovered(&self) -> u64 {
        self.tenants_discovered.load(Ordering::Relaxed)
    }

    pub fn entities_processed(&self) -> u64 {
        self.entities_processed.load(Ordering::Relaxed)
    }

    pub fn entity_errors(&self) -> u64 {
        self.entity_errors.load(Ordering::Relaxed)
    }

    pub fn records_upserted(&self) -> u64 {
        self.records_upserted.load(Ordering::Relaxed)
    }
}

impl StatsProvider for AggregationStats {
    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles_completed": self.cycles_completed(),
            "cycle_errors": self.cycle_errors(),
            "tenants_discovered": self.tenants_discovered(),
            "entities_processed": self.entities_processed(),
            "entity_errors": self.entity_errors(),
            "records_upserted": self.records_upserted(),
        })
    }
}
