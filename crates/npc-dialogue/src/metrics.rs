use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle counters shared by the store, sweeper and background jobs
#[derive(Debug, Default)]
pub struct DialogueMetrics {
    pub conversations_opened: AtomicU64,
    pub conversations_archived: AtomicU64,
    pub evicted_by_age: AtomicU64,
    pub evicted_by_capacity: AtomicU64,
    pub summaries_stored: AtomicU64,
    pub summaries_dropped: AtomicU64,
    pub compressions_started: AtomicU64,
    pub compressions_applied: AtomicU64,
    pub compressions_discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub conversations_opened: u64,
    pub conversations_archived: u64,
    pub evicted_by_age: u64,
    pub evicted_by_capacity: u64,
    pub summaries_stored: u64,
    pub summaries_dropped: u64,
    pub compressions_started: u64,
    pub compressions_applied: u64,
    pub compressions_discarded: u64,
}

impl DialogueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_opened(&self) {
        self.conversations_opened.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_archived(&self) {
        self.conversations_archived.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_evicted_by_age(&self, n: u64) {
        self.evicted_by_age.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_evicted_by_capacity(&self, n: u64) {
        self.evicted_by_capacity.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_summary_stored(&self) {
        self.summaries_stored.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_summary_dropped(&self) {
        self.summaries_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_compression_started(&self) {
        self.compressions_started.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_compression_applied(&self) {
        self.compressions_applied.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_compression_discarded(&self) {
        self.compressions_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            conversations_opened: self.conversations_opened.load(Ordering::Relaxed),
            conversations_archived: self.conversations_archived.load(Ordering::Relaxed),
            evicted_by_age: self.evicted_by_age.load(Ordering::Relaxed),
            evicted_by_capacity: self.evicted_by_capacity.load(Ordering::Relaxed),
            summaries_stored: self.summaries_stored.load(Ordering::Relaxed),
            summaries_dropped: self.summaries_dropped.load(Ordering::Relaxed),
            compressions_started: self.compressions_started.load(Ordering::Relaxed),
            compressions_applied: self.compressions_applied.load(Ordering::Relaxed),
            compressions_discarded: self.compressions_discarded.load(Ordering::Relaxed),
        }
    }
}
