use std::sync::Arc;
use tracing::{debug, info};

use super::conversation_store::ConversationStore;
use crate::config::MaintenanceConfig;

/// Archive bounds. Non-positive values disable the matching pass.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub deletion_timer_secs: i64,
    pub max_archived: i64,
}

impl From<&MaintenanceConfig> for RetentionPolicy {
    fn from(cfg: &MaintenanceConfig) -> Self {
        Self {
            deletion_timer_secs: cfg.deletion_timer_secs,
            max_archived: cfg.max_archived,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub over_capacity: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired + self.over_capacity
    }
}

/// Evicts archived transcripts by age and by count. Holds no timer: the host
/// calls [`MaintenanceSweeper::sweep`] on its own cadence (about once a second).
/// The pair-memory index is never touched.
pub struct MaintenanceSweeper {
    store: Arc<ConversationStore>,
    policy: RetentionPolicy,
}

impl MaintenanceSweeper {
    pub fn new(store: Arc<ConversationStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn sweep(&self) -> SweepReport {
        if self.store.inner.read().archived.is_empty() {
            return SweepReport::default();
        }

        let now = self.store.clock.now_ms();
        let mut guard = self.store.inner.write();
        let inner = &mut *guard;
        let mut report = SweepReport::default();

        // 1. Age
        if self.policy.deletion_timer_secs > 0 {
            let timeout = self.policy.deletion_timer_secs as u64;
            let before = inner.archived.len();
            inner.archived.retain(|id, record| {
                let elapsed_secs = now.saturating_sub(record.last_activity_ms) / 1000;
                let keep = elapsed_secs <= timeout;
                if !keep {
                    debug!("Archived conversation {} expired after {}s", id, elapsed_secs);
                }
                keep
            });
            report.expired = before - inner.archived.len();
            if report.expired > 0 {
                let archived = &inner.archived;
                inner.archive_order.retain(|id| archived.contains_key(id));
            }
        }

        // 2. Capacity, oldest archival first
        if self.policy.max_archived > 0 {
            let limit = self.policy.max_archived as usize;
            while inner.archived.len() > limit {
                let Some(oldest) = inner.archive_order.pop_front() else {
                    break;
                };
                if inner.archived.remove(&oldest).is_some() {
                    report.over_capacity += 1;
                }
            }
        }
        drop(guard);

        if report.total() > 0 {
            let metrics = &self.store.metrics;
            metrics.inc_evicted_by_age(report.expired as u64);
            metrics.inc_evicted_by_capacity(report.over_capacity as u64);
            info!(
                "Maintenance evicted {} expired and {} over-capacity archived conversations",
                report.expired, report.over_capacity
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActorRef, ConversationId};
    use crate::registry::InMemoryRegistry;
    use crate::store::HistoryPolicy;
    use crate::time::ManualClock;

    fn setup(policy: RetentionPolicy) -> (Arc<ConversationStore>, Arc<ManualClock>, MaintenanceSweeper) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(ConversationStore::new(
            Arc::new(InMemoryRegistry::new()),
            clock.clone(),
            HistoryPolicy::default(),
        ));
        let sweeper = MaintenanceSweeper::new(store.clone(), policy);
        (store, clock, sweeper)
    }

    fn archive(store: &ConversationStore, a: i32, b: i32) -> ConversationId {
        let id = store.open_conversation(ActorRef(a), ActorRef(b), None).unwrap();
        store.close_conversation(id);
        id
    }

    #[test]
    fn test_empty_archive_is_noop() {
        let (_, _, sweeper) = setup(RetentionPolicy { deletion_timer_secs: 1, max_archived: 1 });
        assert_eq!(sweeper.sweep(), SweepReport::default());
    }

    #[test]
    fn test_age_eviction_boundary() {
        let (store, clock, sweeper) =
            setup(RetentionPolicy { deletion_timer_secs: 120, max_archived: 0 });
        let id = archive(&store, 1, 2);

        clock.advance_secs(120);
        assert_eq!(sweeper.sweep().expired, 0);
        assert!(store.is_archived(id));

        clock.advance_secs(1);
        assert_eq!(sweeper.sweep().expired, 1);
        assert!(!store.is_archived(id));
    }

    #[test]
    fn test_zero_timeout_disables_age_pass() {
        let (store, clock, sweeper) =
            setup(RetentionPolicy { deletion_timer_secs: 0, max_archived: 0 });
        archive(&store, 1, 2);
        clock.advance_secs(10_000);
        assert_eq!(sweeper.sweep().total(), 0);
        assert_eq!(store.stats().archived, 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let (store, clock, sweeper) =
            setup(RetentionPolicy { deletion_timer_secs: 0, max_archived: 2 });
        let first = archive(&store, 1, 2);
        clock.advance_secs(1);
        let second = archive(&store, 3, 4);
        clock.advance_secs(1);
        let third = archive(&store, 5, 6);

        let report = sweeper.sweep();
        assert_eq!(report.over_capacity, 1);
        assert!(!store.is_archived(first));
        assert!(store.is_archived(second));
        assert!(store.is_archived(third));
    }

    #[test]
    fn test_pair_memory_survives_eviction() {
        let (store, clock, sweeper) =
            setup(RetentionPolicy { deletion_timer_secs: 60, max_archived: 0 });
        let id = archive(&store, 1, 2);
        store.set_summary(id, "Owes money.");

        clock.advance_secs(61);
        sweeper.sweep();

        assert_eq!(store.stats().archived, 0);
        assert_eq!(store.stats().pair_memories, 1);
        assert_eq!(store.metrics().snapshot().evicted_by_age, 1);
    }
}
