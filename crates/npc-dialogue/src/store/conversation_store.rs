use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use super::pair_key::pair_key;
use crate::config::ConversationConfig;
use crate::error::DialogueError;
use crate::metrics::DialogueMetrics;
use crate::models::{
    ActorRef, ConversationContext, ConversationId, ConversationRecord, ParticipantId, Role,
};
use crate::registry::ParticipantRegistry;
use crate::time::Clock;

/// First id handed out by the generator
const FIRST_CONVERSATION_ID: u64 = 100;

/// Extra lines tolerated above the cap before the oldest line is dropped,
/// so the cap does not fight the compressor's own trimming cadence.
const HISTORY_SLACK: usize = 5;

/// Soft cap on active transcript length
#[derive(Debug, Clone, Copy)]
pub struct HistoryPolicy {
    pub max_history_lines: usize,
}

impl HistoryPolicy {
    pub fn effective_limit(&self) -> usize {
        if self.max_history_lines < 5 {
            10
        } else {
            self.max_history_lines
        }
    }
}

impl From<&ConversationConfig> for HistoryPolicy {
    fn from(cfg: &ConversationConfig) -> Self {
        Self { max_history_lines: cfg.max_history_lines }
    }
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self::from(&ConversationConfig::default())
    }
}

/// Where a late summary ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryOutcome {
    Active,
    Archived,
    /// Record already evicted; the summary is lost
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub active: usize,
    pub archived: usize,
    pub pair_memories: usize,
}

/// All shared conversation state, guarded as one unit
#[derive(Default)]
pub(super) struct StoreInner {
    pub(super) active: HashMap<ConversationId, ConversationRecord>,
    pub(super) archived: HashMap<ConversationId, ConversationRecord>,
    /// Archived ids in archival order (oldest first)
    pub(super) archive_order: VecDeque<ConversationId>,
    pub(super) participant_index: HashMap<ParticipantId, ConversationId>,
    pub(super) pair_memory: HashMap<u64, String>,
}

impl StoreInner {
    fn remove_archived(&mut self, id: ConversationId) -> Option<ConversationRecord> {
        let rec = self.archived.remove(&id)?;
        self.archive_order.retain(|queued| *queued != id);
        Some(rec)
    }

    /// Drop `participant` from the index if it pointed at `closing`, falling back
    /// to any other active conversation the participant is still part of.
    fn release_participant(&mut self, participant: ParticipantId, closing: ConversationId) {
        if self.participant_index.get(&participant) != Some(&closing) {
            return;
        }
        let other = self
            .active
            .values()
            .find(|rec| rec.id != closing && rec.participants.contains(&participant))
            .map(|rec| rec.id);
        match other {
            Some(id) => {
                self.participant_index.insert(participant, id);
            }
            None => {
                self.participant_index.remove(&participant);
            }
        }
    }
}

/// Thread-safe store of active and archived conversations plus the
/// pair-memory index. Constructed once and shared as `Arc<ConversationStore>`.
pub struct ConversationStore {
    pub(super) inner: RwLock<StoreInner>,
    next_id: Mutex<u64>,
    registry: Arc<dyn ParticipantRegistry>,
    pub(super) clock: Arc<dyn Clock>,
    policy: HistoryPolicy,
    pub(super) metrics: Arc<DialogueMetrics>,
}

impl ConversationStore {
    pub fn new(
        registry: Arc<dyn ParticipantRegistry>,
        clock: Arc<dyn Clock>,
        policy: HistoryPolicy,
    ) -> Self {
        info!(
            "Initializing conversation store (history cap {} + {})",
            policy.effective_limit(),
            HISTORY_SLACK
        );
        Self {
            inner: RwLock::new(StoreInner::default()),
            next_id: Mutex::new(FIRST_CONVERSATION_ID),
            registry,
            clock,
            policy,
            metrics: Arc::new(DialogueMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<DialogueMetrics> {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Resolve an actor handle through the registry
    pub fn resolve(&self, actor: ActorRef) -> Result<ParticipantId, DialogueError> {
        self.registry.resolve(actor)
    }

    /// Next counter value not held by an active or archived record.
    /// Called with the counter lock held, before the store lock.
    fn generate_id(counter: &mut u64, inner: &StoreInner) -> ConversationId {
        let mut candidate = ConversationId(*counter);
        while inner.active.contains_key(&candidate) || inner.archived.contains_key(&candidate) {
            candidate = ConversationId(candidate.0 + 1);
        }
        *counter = candidate.0 + 1;
        candidate
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Open a conversation between two actors.
    ///
    /// A `force_id` that already names an active conversation is returned
    /// unchanged. If a summary exists for this pair, the new history is seeded
    /// with it as a system memory line.
    pub fn open_conversation(
        &self,
        initiator: ActorRef,
        target: ActorRef,
        force_id: Option<ConversationId>,
    ) -> Result<ConversationId, DialogueError> {
        let p1 = self.registry.resolve(initiator)?;
        let p2 = self.registry.resolve(target)?;

        if let Some(id) = force_id {
            if self.inner.read().active.contains_key(&id) {
                debug!("Conversation {} already active, resuming", id);
                return Ok(id);
            }
        }

        let now = self.clock.now_ms();
        // Lock order: id counter, then store
        let mut counter = self.next_id.lock();
        let mut inner = self.inner.write();

        let candidate = match force_id {
            Some(id) => {
                // Re-check under the write lock: another thread may have opened it meanwhile
                if inner.active.contains_key(&id) {
                    return Ok(id);
                }
                if inner.remove_archived(id).is_some() {
                    debug!("Reusing archived id {}, stale transcript discarded", id);
                }
                if id.0 >= *counter {
                    *counter = id.0 + 1;
                }
                id
            }
            None => Self::generate_id(&mut counter, &inner),
        };
        drop(counter);

        let mut record = ConversationRecord::new(candidate, p1, p2, now);
        if let Some(previous) = inner.pair_memory.get(&pair_key(p1, p2)) {
            record
                .history
                .push(Role::System.line(&format!("[MEMORY] Previous encounter: {}", previous)));
        }

        inner.active.insert(candidate, record);
        inner.participant_index.insert(p1, candidate);
        inner.participant_index.insert(p2, candidate);
        drop(inner);

        self.metrics.inc_opened();
        info!("Opened conversation {} between {} and {}", candidate, p1, p2);
        Ok(candidate)
    }

    /// Archive an active conversation. No-op for unknown or archived ids.
    pub fn close_conversation(&self, id: ConversationId) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write();

        let Some(mut record) = inner.active.remove(&id) else {
            return;
        };
        record.active = false;
        // Archival starts the deletion clock
        record.touch(now);

        for participant in record.participants.clone() {
            inner.release_participant(participant, id);
        }

        inner.archived.insert(id, record);
        inner.archive_order.push_back(id);
        let archived = inner.archived.len();
        drop(inner);

        self.metrics.inc_archived();
        info!("Archived conversation {} ({} archived)", id, archived);
    }

    // ── Data access ─────────────────────────────────────────────────────

    /// Active conversation an actor takes part in, if any
    pub fn active_conversation_id(&self, actor: ActorRef) -> Option<ConversationId> {
        let participant = self.registry.resolve(actor).ok()?;
        self.inner.read().participant_index.get(&participant).copied()
    }

    /// Append a role-tagged line and enforce the soft history cap
    pub fn append_message(&self, id: ConversationId, role: Role, text: &str) {
        let now = self.clock.now_ms();
        let cap = self.policy.effective_limit() + HISTORY_SLACK;

        let mut inner = self.inner.write();
        let Some(record) = inner.active.get_mut(&id) else {
            return;
        };

        record.history.push(role.line(text));
        record.touch(now);

        // Index 0 holds the memory/system seed and is never the one dropped
        if record.history.len() > cap && record.history.len() > 1 {
            record.history.remove(1);
            debug!("Conversation {} over cap {}, dropped oldest line", id, cap);
        }
    }

    /// Wholesale replacement of an active transcript
    pub fn replace_history(&self, id: ConversationId, history: Vec<String>) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.active.get_mut(&id) {
            record.history = history;
        }
    }

    /// Owned snapshot of an active transcript (empty when not active)
    pub fn history(&self, id: ConversationId) -> Vec<String> {
        self.inner
            .read()
            .active
            .get(&id)
            .map(|record| record.history.clone())
            .unwrap_or_default()
    }

    /// Attach an end-of-conversation summary.
    ///
    /// Archived records also feed the pair-memory index. A record that the
    /// sweeper already evicted silently loses its summary.
    pub fn set_summary(&self, id: ConversationId, summary: &str) -> SummaryOutcome {
        let mut inner = self.inner.write();

        if let Some(record) = inner.active.get_mut(&id) {
            record.summary = Some(summary.to_string());
            drop(inner);
            self.metrics.inc_summary_stored();
            return SummaryOutcome::Active;
        }

        let pair = match inner.archived.get_mut(&id) {
            Some(record) => {
                record.summary = Some(summary.to_string());
                record.pair()
            }
            None => {
                drop(inner);
                self.metrics.inc_summary_dropped();
                debug!("Conversation {} already evicted, summary dropped", id);
                return SummaryOutcome::Dropped;
            }
        };

        if let Some((a, b)) = pair {
            inner.pair_memory.insert(pair_key(a, b), summary.to_string());
        }
        drop(inner);

        self.metrics.inc_summary_stored();
        info!("Stored summary for archived conversation {}", id);
        SummaryOutcome::Archived
    }

    pub fn set_context(&self, id: ConversationId, location: &str, weather: &str) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.active.get_mut(&id) {
            record.context = ConversationContext {
                location: location.to_string(),
                weather: weather.to_string(),
            };
        }
    }

    pub fn context(&self, id: ConversationId) -> Option<ConversationContext> {
        self.inner.read().active.get(&id).map(|record| record.context.clone())
    }

    /// Participants of an active or archived conversation
    pub fn participants(&self, id: ConversationId) -> Option<Vec<ParticipantId>> {
        let inner = self.inner.read();
        inner
            .active
            .get(&id)
            .or_else(|| inner.archived.get(&id))
            .map(|record| record.participants.clone())
    }

    /// Attached summary of an active or archived conversation
    pub fn summary(&self, id: ConversationId) -> Option<String> {
        let inner = self.inner.read();
        inner
            .active
            .get(&id)
            .or_else(|| inner.archived.get(&id))
            .and_then(|record| record.summary.clone())
    }

    /// Durable memory for a pair, regardless of argument order
    pub fn last_summary_between(&self, a: ParticipantId, b: ParticipantId) -> Option<String> {
        self.inner.read().pair_memory.get(&pair_key(a, b)).cloned()
    }

    pub fn is_active(&self, id: ConversationId) -> bool {
        self.inner
            .read()
            .active
            .get(&id)
            .map(|record| record.active)
            .unwrap_or(false)
    }

    pub fn is_archived(&self, id: ConversationId) -> bool {
        self.inner.read().archived.contains_key(&id)
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        StoreStats {
            active: inner.active.len(),
            archived: inner.archived.len(),
            pair_memories: inner.pair_memory.len(),
        }
    }
}
