use common::StatsProvider;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters exposed on `/stats`.
///
/// Accounting: `events_received = events_processed + events_failed +
/// store-failure dead letters + pending_batch_len`. `events_failed` counts
/// validation failures (which are also dead-lettered), while
/// `events_dead_lettered` counts every dead-letter publish attempt.
#[derive(Debug, Default)]
pub struct MaterializerStats {
    events_received: AtomicU64,
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    events_dead_lettered: AtomicU64,
    flushes: AtomicU64,
    pending_batch_len: AtomicU64,
}

impl MaterializerStats {
    pub fn incr_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_processed(&self, n: u64) {
        self.events_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dead_lettered(&self) {
        self.events_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_flushes(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pending_batch_len(&self, n: u64) {
        self.pending_batch_len.store(n, Ordering::Relaxed);
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    pub fn events_dead_lettered(&self) -> u64 {
        self.events_dead_lettered.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn pending_batch_len(&self) -> u64 {
        self.pending_batch_len.load(Ordering::Relaxed)
    }
}

impl StatsProvider for MaterializerStats {
    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "events_received": self.events_received(),
            "events_processed": self.events_processed(),
            "events_failed": self.events_failed(),
            "events_dead_lettered": self.events_dead_lettered(),
            "flushes": self.flushes(),
            "pending_batch_len": self.pending_batch_len(),
        })
    }
}
