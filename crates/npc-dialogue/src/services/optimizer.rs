//! Single-flight background compression of aging transcript lines.
//!
//! One coordinator is shared process-wide. It moves `IDLE -> COMPRESSING ->
//! IDLE`: a trigger while a job is in flight is refused, never queued. The
//! foreground loop polls [`CompressionCoordinator::apply_pending`] every tick
//! and writes the spliced history back to the store itself.

use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::inference::InferenceEngine;
use super::prompt_builder;
use crate::config::OptimizerConfig;
use crate::metrics::DialogueMetrics;
use crate::models::{ConversationId, Role};

/// Most recent lines always kept verbatim
const KEEP_RECENT: usize = 4;

/// Pacing for light mode, which runs in the background of everything else
const LIGHT_TOKENS_PER_SECOND: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Disabled,
    Light,
    Aggressive,
    /// Length heuristic that turns aggressive under reported resource pressure
    Auto,
}

impl OptimizationLevel {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Disabled,
            1 => Self::Light,
            2 => Self::Aggressive,
            3 => Self::Auto,
            other => {
                warn!("Unknown optimization level {}, compression disabled", other);
                Self::Disabled
            }
        }
    }

    /// History must exceed this many lines before a compression starts
    pub fn trigger_threshold(&self, under_pressure: bool) -> Option<usize> {
        match self {
            Self::Disabled => None,
            Self::Light => Some(10),
            Self::Aggressive => Some(6),
            Self::Auto if under_pressure => Some(6),
            Self::Auto => Some(15),
        }
    }
}

/// Per-conversation override of the global defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizationProfile {
    pub level: OptimizationLevel,
    pub tokens_per_second: Option<u32>,
}

struct InFlight {
    conversation: ConversationId,
    lines: usize,
    handle: JoinHandle<String>,
}

pub struct CompressionCoordinator {
    engine: Arc<dyn InferenceEngine>,
    runtime: Handle,
    config: OptimizerConfig,
    default_level: OptimizationLevel,
    profiles: DashMap<ConversationId, OptimizationProfile>,
    in_flight: Mutex<Option<InFlight>>,
    under_pressure: AtomicBool,
    metrics: Arc<DialogueMetrics>,
}

impl CompressionCoordinator {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        runtime: Handle,
        config: OptimizerConfig,
        metrics: Arc<DialogueMetrics>,
    ) -> Self {
        let default_level = OptimizationLevel::from_level(config.default_level);
        info!("Initializing compression coordinator (default level {:?})", default_level);
        Self {
            engine,
            runtime,
            config,
            default_level,
            profiles: DashMap::new(),
            in_flight: Mutex::new(None),
            under_pressure: AtomicBool::new(false),
            metrics,
        }
    }

    // ── Profiles ────────────────────────────────────────────────────────

    pub fn set_conversation_profile(&self, id: ConversationId, level: OptimizationLevel) {
        self.profiles
            .entry(id)
            .and_modify(|p| p.level = level)
            .or_insert(OptimizationProfile { level, tokens_per_second: None });
    }

    pub fn set_conversation_throttle(&self, id: ConversationId, tokens_per_second: u32) {
        let default_level = self.default_level;
        self.profiles
            .entry(id)
            .and_modify(|p| p.tokens_per_second = Some(tokens_per_second))
            .or_insert(OptimizationProfile {
                level: default_level,
                tokens_per_second: Some(tokens_per_second),
            });
    }

    pub fn clear_profile(&self, id: ConversationId) {
        self.profiles.remove(&id);
    }

    pub fn level_for(&self, id: ConversationId) -> OptimizationLevel {
        self.profiles.get(&id).map(|p| p.level).unwrap_or(self.default_level)
    }

    fn tokens_per_second_for(&self, id: ConversationId, level: OptimizationLevel) -> u32 {
        if let Some(tps) = self.profiles.get(&id).and_then(|p| p.tokens_per_second) {
            return tps;
        }
        let ceiling = self.config.tokens_per_second;
        match level {
            OptimizationLevel::Light if ceiling > 0 => ceiling.min(LIGHT_TOKENS_PER_SECOND),
            _ => ceiling,
        }
    }

    /// Resource pressure as reported by the host (see `MemoryPressureProbe`)
    pub fn set_resource_pressure(&self, under_pressure: bool) {
        let previous = self.under_pressure.swap(under_pressure, Ordering::Relaxed);
        if previous != under_pressure {
            info!("Resource pressure changed: {}", under_pressure);
        }
    }

    pub fn is_compressing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Conversation the outstanding job was started for
    pub fn in_flight_conversation(&self) -> Option<ConversationId> {
        self.in_flight.lock().as_ref().map(|job| job.conversation)
    }

    // ── Trigger / apply ─────────────────────────────────────────────────

    /// Start a compression job for `history` if the level's threshold is
    /// exceeded and no job is in flight. Returns whether a job started.
    pub fn check_and_optimize(
        &self,
        id: ConversationId,
        history: &[String],
        npc_name: &str,
        player_name: &str,
    ) -> bool {
        let mut slot = self.in_flight.lock();
        if slot.is_some() {
            return false;
        }

        let level = self.level_for(id);
        let under_pressure = self.under_pressure.load(Ordering::Relaxed);
        let Some(threshold) = level.trigger_threshold(under_pressure) else {
            return false;
        };
        if history.len() <= threshold {
            return false;
        }

        // Index 0 is the system/memory seed; the last lines stay verbatim
        let start = 1;
        let end = history.len().saturating_sub(KEEP_RECENT);
        if end <= start {
            return false;
        }

        let window = history[start..end].to_vec();
        let lines = window.len();
        let tokens_per_second = self.tokens_per_second_for(id, level);

        let handle = self.runtime.spawn(compress_lines(
            self.engine.clone(),
            window,
            npc_name.to_string(),
            player_name.to_string(),
            tokens_per_second,
            self.config.max_summary_tokens,
        ));

        *slot = Some(InFlight { conversation: id, lines, handle });
        drop(slot);

        self.metrics.inc_compression_started();
        info!(
            "Compression started for conversation {}: {} lines ({:?}, {} tok/s)",
            id, lines, level, tokens_per_second
        );
        true
    }

    /// Non-blocking poll of the in-flight job. When it has finished with a
    /// result, replace the compressed window of `history` with one system line.
    /// Returns whether `history` changed.
    pub fn apply_pending(&self, id: ConversationId, history: &mut Vec<String>) -> bool {
        let mut slot = self.in_flight.lock();
        let finished = matches!(slot.as_ref(), Some(job) if job.handle.is_finished());
        if !finished {
            return false;
        }
        let Some(mut job) = slot.take() else {
            return false;
        };

        let summary = match (&mut job.handle).now_or_never() {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!("Compression job for conversation {} failed: {}", job.conversation, e);
                String::new()
            }
            None => {
                // finished but not yet observable from this task; try next tick
                *slot = Some(job);
                return false;
            }
        };
        drop(slot);

        if summary.is_empty() {
            self.metrics.inc_compression_discarded();
            debug!("Compression for conversation {} produced nothing", job.conversation);
            return false;
        }
        if job.conversation != id {
            self.metrics.inc_compression_discarded();
            warn!(
                "Compression for conversation {} finished while applying to {}, discarded",
                job.conversation, id
            );
            return false;
        }
        if history.len() <= job.lines + 1 {
            self.metrics.inc_compression_discarded();
            warn!(
                "Conversation {} shrank to {} lines, cannot replace {}",
                id,
                history.len(),
                job.lines
            );
            return false;
        }

        let line = format!("{}{}\n<|end|>", Role::System.tag(), summary);
        history.drain(1..1 + job.lines);
        history.insert(1, line);

        self.metrics.inc_compression_applied();
        info!("Applied compression to conversation {}: replaced {} lines", id, job.lines);
        true
    }

    /// Abort an outstanding job; used on process shutdown
    pub fn shutdown(&self) {
        if let Some(job) = self.in_flight.lock().take() {
            job.handle.abort();
            info!("Aborted compression job for conversation {}", job.conversation);
        }
    }
}

/// Background worker: stream a compression of `lines`, pacing token reads so
/// the foreground conversation keeps its share of inference compute.
/// Any failure yields an empty string.
async fn compress_lines(
    engine: Arc<dyn InferenceEngine>,
    lines: Vec<String>,
    npc_name: String,
    player_name: String,
    tokens_per_second: u32,
    max_tokens: usize,
) -> String {
    let prompt = prompt_builder::compression_prompt(&lines, &npc_name, &player_name);

    let mut stream = match engine.generate_stream(&prompt, max_tokens).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Compression inference unavailable: {}", e);
            return String::new();
        }
    };

    let limiter = NonZeroU32::new(tokens_per_second)
        .map(|rate| RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)));

    let mut text = String::new();
    let mut produced = 0;
    while produced < max_tokens {
        if let Some(limiter) = &limiter {
            limiter.until_ready().await;
        }
        match stream.next().await {
            Some(Ok(piece)) => {
                text.push_str(&piece);
                produced += 1;
            }
            Some(Err(e)) => {
                warn!("Compression decode failed after {} tokens: {}", produced, e);
                return String::new();
            }
            None => break,
        }
    }

    text.trim().to_string()
}
