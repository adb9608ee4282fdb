//! Conversation storage
//!
//! - Active and archived transcripts behind one reader/writer lock
//! - Participant → active conversation lookup
//! - Pair-memory index that outlives archive eviction
//! - Age and capacity sweeps over the archive

mod conversation_store;
mod pair_key;
mod sweeper;

pub use conversation_store::{ConversationStore, HistoryPolicy, StoreStats, SummaryOutcome};
pub use pair_key::pair_key;
pub use sweeper::{MaintenanceSweeper, RetentionPolicy, SweepReport};
