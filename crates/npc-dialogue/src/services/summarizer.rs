use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::inference::InferenceEngine;
use super::prompt_builder;
use crate::config::SummaryConfig;
use crate::models::ConversationId;
use crate::store::{ConversationStore, SummaryOutcome};

/// Writes the end-of-conversation memo into the archive and the pair-memory
/// index. Independent of the compression coordinator: both may run at once.
pub struct ConversationSummarizer {
    store: Arc<ConversationStore>,
    engine: Arc<dyn InferenceEngine>,
    runtime: Handle,
    config: SummaryConfig,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    /// Cleared on shutdown; late jobs skip their write-back
    live: Arc<AtomicBool>,
}

impl ConversationSummarizer {
    pub fn new(
        store: Arc<ConversationStore>,
        engine: Arc<dyn InferenceEngine>,
        runtime: Handle,
        config: SummaryConfig,
    ) -> Self {
        Self {
            store,
            engine,
            runtime,
            config,
            jobs: Mutex::new(Vec::new()),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Snapshot the transcript, archive the conversation, and launch a memo job
    /// when the transcript is long enough. Returns whether a job was launched.
    pub fn end_conversation(&self, id: ConversationId, npc_name: &str, player_name: &str) -> bool {
        let snapshot = self.store.history(id);
        self.store.close_conversation(id);

        if !self.config.enabled || !self.live.load(Ordering::SeqCst) {
            return false;
        }
        if snapshot.len() <= self.config.min_history_lines {
            debug!(
                "Conversation {} too short to summarize ({} lines)",
                id,
                snapshot.len()
            );
            return false;
        }

        let prompt = prompt_builder::summary_prompt(
            &snapshot,
            npc_name,
            player_name,
            self.config.min_chars,
            self.config.max_chars,
        );
        let store = self.store.clone();
        let engine = self.engine.clone();
        let live = self.live.clone();
        let max_tokens = self.config.max_tokens;

        let handle = self.runtime.spawn(async move {
            let summary = match engine.generate_text(&prompt, max_tokens).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Summary for conversation {} failed: {}", id, e);
                    return;
                }
            };
            let summary = summary.trim();
            if summary.is_empty() || summary.contains("LLM_ERROR") {
                warn!("Summary for conversation {} unusable, discarded", id);
                return;
            }
            if !live.load(Ordering::SeqCst) {
                info!("Shut down during summarization of {}, discarding result", id);
                return;
            }
            match store.set_summary(id, summary) {
                SummaryOutcome::Dropped => {
                    info!("Conversation {} evicted before its summary arrived", id)
                }
                outcome => debug!("Summary for conversation {} stored ({:?})", id, outcome),
            }
        });

        self.jobs.lock().push(handle);
        info!("Conversation {} closed, background summary launched", id);
        true
    }

    /// Drop finished handles, logging jobs that panicked. Call once per tick.
    pub fn reap_finished(&self) -> usize {
        let finished: Vec<JoinHandle<()>> = {
            let mut jobs = self.jobs.lock();
            let (done, pending): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *jobs).into_iter().partition(|h| h.is_finished());
            *jobs = pending;
            done
        };

        let count = finished.len();
        for handle in finished {
            if let Some(Err(e)) = futures::FutureExt::now_or_never(handle) {
                if e.is_panic() {
                    error!("Summary job panicked: {}", e);
                }
            }
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Stop accepting write-backs and wait (bounded) for outstanding jobs.
    /// Jobs still running at the deadline are aborted.
    pub async fn shutdown(&self) {
        self.live.store(false, Ordering::SeqCst);
        let mut handles = std::mem::take(&mut *self.jobs.lock());
        if handles.is_empty() {
            return;
        }

        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        info!("Waiting for {} summary jobs", handles.len());
        let finished = tokio::time::timeout(timeout, futures::future::join_all(handles.iter_mut()))
            .await
            .is_ok();
        if finished {
            return;
        }

        let mut aborted = 0;
        for handle in handles.iter().filter(|h| !h.is_finished()) {
            handle.abort();
            aborted += 1;
        }
        warn!("{} summary jobs still running after {:?}, aborted", aborted, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActorRef, Role};
    use crate::registry::InMemoryRegistry;
    use crate::services::inference::TokenStream;
    use crate::store::HistoryPolicy;
    use crate::time::ManualClock;
    use anyhow::Result;
    use std::sync::atomic::AtomicUsize;

    struct FixedEngine {
        reply: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl InferenceEngine for FixedEngine {
        async fn generate_stream(&self, _prompt: &str, _max_tokens: usize) -> Result<TokenStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let pieces: Vec<Result<String>> = vec![Ok(self.reply.to_string())];
            Ok(Box::pin(futures::stream::iter(pieces)))
        }
    }

    fn setup(reply: &'static str) -> (Arc<ConversationStore>, Arc<FixedEngine>, ConversationSummarizer) {
        let store = Arc::new(ConversationStore::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(ManualClock::new(0)),
            HistoryPolicy::default(),
        ));
        let engine = Arc::new(FixedEngine { reply, calls: AtomicUsize::new(0) });
        let summarizer = ConversationSummarizer::new(
            store.clone(),
            engine.clone(),
            Handle::current(),
            SummaryConfig::default(),
        );
        (store, engine, summarizer)
    }

    fn open_with_lines(store: &ConversationStore, lines: usize) -> ConversationId {
        let id = store.open_conversation(ActorRef(1), ActorRef(2), None).unwrap();
        for i in 0..lines {
            store.append_message(id, Role::User, &format!("line {}", i));
        }
        id
    }

    async fn drain(summarizer: &ConversationSummarizer) {
        for _ in 0..400 {
            summarizer.reap_finished();
            if summarizer.pending() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("summary job never finished");
    }

    #[tokio::test]
    async fn test_short_conversation_not_summarized() {
        let (store, engine, summarizer) = setup("memo");
        let id = open_with_lines(&store, 0);

        assert!(!summarizer.end_conversation(id, "Lamar", "Player"));
        assert!(store.is_archived(id));
        assert_eq!(summarizer.pending(), 0);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_summary_reaches_pair_memory() {
        let (store, engine, summarizer) = setup("  Lamar wants his car back.  ");
        let id = open_with_lines(&store, 6);

        assert!(summarizer.end_conversation(id, "Lamar", "Player"));
        drain(&summarizer).await;

        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.summary(id).as_deref(), Some("Lamar wants his car back."));
        let a = store.resolve(ActorRef(1)).unwrap();
        let b = store.resolve(ActorRef(2)).unwrap();
        assert_eq!(
            store.last_summary_between(b, a).as_deref(),
            Some("Lamar wants his car back.")
        );
    }

    #[tokio::test]
    async fn test_error_marker_discarded() {
        let (store, _, summarizer) = setup("LLM_ERROR: context overflow");
        let id = open_with_lines(&store, 6);

        assert!(summarizer.end_conversation(id, "Lamar", "Player"));
        drain(&summarizer).await;
        assert_eq!(store.summary(id), None);
        assert_eq!(store.stats().pair_memories, 0);
    }

    struct HangingEngine {
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl InferenceEngine for HangingEngine {
        async fn generate_stream(&self, _prompt: &str, _max_tokens: usize) -> Result<TokenStream> {
            let _guard = SetOnDrop(self.dropped.clone());
            futures::future::pending::<Result<TokenStream>>().await
        }
    }

    #[tokio::test]
    async fn test_shutdown_aborts_jobs_past_timeout() {
        let store = Arc::new(ConversationStore::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(ManualClock::new(0)),
            HistoryPolicy::default(),
        ));
        let dropped = Arc::new(AtomicBool::new(false));
        let engine = Arc::new(HangingEngine { dropped: dropped.clone() });
        let config = SummaryConfig { shutdown_timeout_ms: 20, ..SummaryConfig::default() };
        let summarizer = ConversationSummarizer::new(store.clone(), engine, Handle::current(), config);

        let id = open_with_lines(&store, 6);
        assert!(summarizer.end_conversation(id, "Lamar", "Player"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!dropped.load(Ordering::SeqCst));

        summarizer.shutdown().await;
        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(summarizer.pending(), 0);
        assert_eq!(store.summary(id), None);
    }

    #[tokio::test]
    async fn test_shutdown_blocks_new_jobs() {
        let (store, _, summarizer) = setup("memo");
        summarizer.shutdown().await;

        let id = open_with_lines(&store, 6);
        assert!(!summarizer.end_conversation(id, "Lamar", "Player"));
        assert!(store.is_archived(id));
    }
}
