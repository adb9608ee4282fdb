use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::inference::InferenceEngine;
use crate::models::ConversationId;

struct InFlightReply {
    conversation: ConversationId,
    handle: JoinHandle<anyhow::Result<String>>,
}

/// Foreground NPC replies as background tasks. The host requests a reply and
/// polls for it every tick; nothing here ever waits on inference.
pub struct ReplyDispatcher {
    engine: Arc<dyn InferenceEngine>,
    runtime: Handle,
    max_tokens: usize,
    in_flight: Mutex<Option<InFlightReply>>,
}

impl ReplyDispatcher {
    pub fn new(engine: Arc<dyn InferenceEngine>, runtime: Handle, max_tokens: usize) -> Self {
        Self {
            engine,
            runtime,
            max_tokens,
            in_flight: Mutex::new(None),
        }
    }

    /// Launch generation for `prompt`. Refused while another reply is pending.
    pub fn request(&self, id: ConversationId, prompt: String) -> bool {
        let mut slot = self.in_flight.lock();
        if slot.is_some() {
            debug!("Reply for conversation {} still pending", id);
            return false;
        }

        let engine = self.engine.clone();
        let max_tokens = self.max_tokens;
        let handle = self
            .runtime
            .spawn(async move { engine.generate_text(&prompt, max_tokens).await });
        *slot = Some(InFlightReply { conversation: id, handle });
        true
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Non-blocking poll. Yields the trimmed reply once the task has finished;
    /// failed or empty generations are logged and dropped.
    pub fn poll(&self) -> Option<(ConversationId, String)> {
        let mut slot = self.in_flight.lock();
        if !matches!(slot.as_ref(), Some(job) if job.handle.is_finished()) {
            return None;
        }
        let mut job = slot.take()?;

        let text = match (&mut job.handle).now_or_never() {
            Some(Ok(Ok(text))) => text,
            Some(Ok(Err(e))) => {
                warn!("Reply generation for conversation {} failed: {}", job.conversation, e);
                return None;
            }
            Some(Err(e)) => {
                warn!("Reply task for conversation {} failed: {}", job.conversation, e);
                return None;
            }
            None => {
                *slot = Some(job);
                return None;
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some((job.conversation, text.to_string()))
    }

    pub fn shutdown(&self) {
        if let Some(job) = self.in_flight.lock().take() {
            job.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::inference::TokenStream;
    use anyhow::Result;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct GatedEngine {
        reply: Option<&'static str>,
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl InferenceEngine for GatedEngine {
        async fn generate_stream(&self, _prompt: &str, _max_tokens: usize) -> Result<TokenStream> {
            self.gate.notified().await;
            let reply = self.reply.ok_or_else(|| anyhow::anyhow!("server down"))?;
            let pieces: Vec<Result<String>> = vec![Ok(reply.to_string())];
            Ok(Box::pin(futures::stream::iter(pieces)))
        }
    }

    fn dispatcher(reply: Option<&'static str>) -> (ReplyDispatcher, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(GatedEngine { reply, gate: gate.clone() });
        (ReplyDispatcher::new(engine, Handle::current(), 64), gate)
    }

    async fn wait_for(d: &ReplyDispatcher) -> Option<(ConversationId, String)> {
        for _ in 0..400 {
            if let Some(reply) = d.poll() {
                return Some(reply);
            }
            if !d.is_pending() {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("reply never finished");
    }

    #[tokio::test]
    async fn test_request_returns_while_inference_runs() {
        let (d, gate) = dispatcher(Some("  Wassup, homie.  "));
        let id = ConversationId(100);

        assert!(d.request(id, "prompt".to_string()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(d.is_pending());
        assert_eq!(d.poll(), None);
        assert!(!d.request(id, "again".to_string()));

        gate.notify_one();
        assert_eq!(wait_for(&d).await, Some((id, "Wassup, homie.".to_string())));
        assert!(!d.is_pending());
        assert!(d.request(id, "next".to_string()));
        d.shutdown();
    }

    #[tokio::test]
    async fn test_failed_generation_is_dropped() {
        let (d, gate) = dispatcher(None);
        assert!(d.request(ConversationId(100), "prompt".to_string()));
        gate.notify_one();
        assert_eq!(wait_for(&d).await, None);
        assert!(!d.is_pending());
    }
}
