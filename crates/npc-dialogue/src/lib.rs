//! NPC dialogue memory core
//!
//! Short-lived per-conversation state for many concurrent (NPC, player)
//! pairings, a pair-summary index that survives archive eviction, and a
//! single-flight background compressor for aging transcripts.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod services;
pub mod store;
pub mod time;

pub use config::Settings;
pub use error::DialogueError;
pub use metrics::{DialogueMetrics, MetricsSnapshot};
pub use models::{
    ActorRef, ConversationContext, ConversationId, ConversationRecord, ParticipantId, Role,
};
pub use registry::{InMemoryRegistry, ParticipantRegistry};
pub use services::{
    CompressionCoordinator, ConversationSummarizer, InferenceEngine, LlmService,
    MemoryPressureProbe, OptimizationLevel, ReplyDispatcher, TokenStream,
};
pub use store::{
    ConversationStore, HistoryPolicy, MaintenanceSweeper, RetentionPolicy, StoreStats,
    SummaryOutcome, SweepReport,
};
pub use time::{Clock, ManualClock, SystemClock};
