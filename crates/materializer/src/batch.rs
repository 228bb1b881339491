use common::RawEvent;
use std::time::Duration;
use tokio::time::Instant;

/// In-memory batch buffer with a size-or-time flush trigger.
///
/// A flush is due when the buffer reaches `capacity` OR `timeout` has passed
/// since the first event was buffered, whichever comes first — so a
/// low-traffic stream still gets bounded latency. The buffer is owned by the
/// single consumer loop and needs no locking.
pub struct EventBatcher {
    capacity: usize,
    timeout: Duration,
    buffer: Vec<RawEvent>,
    first_buffered_at: Option<Instant>,
}

impl EventBatcher {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity,
            timeout,
            buffer: Vec::with_capacity(capacity),
            first_buffered_at: None,
        }
    }

    pub fn push(&mut self, event: RawEvent) {
        if self.buffer.is_empty() {
            self.first_buffered_at = Some(Instant::now());
        }
        self.buffer.push(event);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn should_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        self.is_full() || self.deadline_elapsed()
    }

    /// Time left until the timeout flush is due. `None` while empty.
    pub fn time_until_deadline(&self) -> Option<Duration> {
        let first = self.first_buffered_at?;
        let deadline = first + self.timeout;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Swap the buffer out, resetting the timeout clock.
    pub fn take(&mut self) -> Vec<RawEvent> {
        self.first_buffered_at = None;
        std::mem::take(&mut self.buffer)
    }

    fn deadline_elapsed(&self) -> bool {
        match self.first_buffered_at {
            Some(first) => first.elapsed() >= self.timeout,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(n: usize) -> RawEvent {
        RawEvent {
            event_id: format!("evt-{n}"),
            tenant_id: "acme".to_string(),
            entity_id: "user-1".to_string(),
            event_type: "cart.add".to_string(),
            source_topic: "events.web".to_string(),
            payload: serde_json::Map::new(),
            event_timestamp: Utc::now(),
            ingest_partition: 0,
            ingest_offset: n as u64,
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_buffer_never_flushes() {
        let batcher = EventBatcher::new(10, Duration::from_secs(5));
        assert!(!batcher.should_flush());
        assert!(batcher.time_until_deadline().is_none());
    }

    #[tokio::test]
    async fn flush_triggers_at_capacity() {
        let mut batcher = EventBatcher::new(3, Duration::from_secs(60));

        batcher.push(event(1));
        batcher.push(event(2));
        assert!(!batcher.should_flush());

        batcher.push(event(3));
        assert!(batcher.should_flush());

        assert_eq!(batcher.take().len(), 3);
        assert!(batcher.is_empty());
        assert!(!batcher.should_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_triggers_on_timeout_with_partial_batch() {
        let mut batcher = EventBatcher::new(100, Duration::from_secs(5));

        batcher.push(event(1));
        assert!(!batcher.should_flush());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(batcher.should_flush());
        assert_eq!(batcher.take().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_clock_starts_at_first_event_not_last() {
        let mut batcher = EventBatcher::new(100, Duration::from_secs(5));

        batcher.push(event(1));
        tokio::time::advance(Duration::from_secs(4)).await;
        batcher.push(event(2));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(batcher.should_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn take_resets_the_timeout_clock() {
        let mut batcher = EventBatcher::new(100, Duration::from_secs(5));

        batcher.push(event(1));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(batcher.should_flush());
        batcher.take();

        batcher.push(event(2));
        assert!(!batcher.should_flush());
        assert_eq!(
            batcher.time_until_deadline().unwrap(),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn stream_of_250_events_at_capacity_100_yields_three_batches() {
        let mut batcher = EventBatcher::new(100, Duration::from_secs(60));
        let mut batches = Vec::new();

        for n in 0..250 {
            batcher.push(event(n));
            if batcher.should_flush() {
                batches.push(batcher.take());
            }
        }
        if !batcher.is_empty() {
            batches.push(batcher.take());
        }

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }
}
