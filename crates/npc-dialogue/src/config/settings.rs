use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::DialogueError;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub conversation: ConversationConfig,
    pub maintenance: MaintenanceConfig,
    pub optimizer: OptimizerConfig,
    pub summary: SummaryConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    /// Soft history cap; values below 5 fall back to 10
    pub max_history_lines: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_history_lines: 20 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Archived transcripts older than this are evicted (<= 0 disables)
    pub deletion_timer_secs: i64,
    /// Upper bound on archived transcripts kept in RAM (<= 0 disables)
    pub max_archived: i64,
    pub sweep_interval_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            deletion_timer_secs: 300,
            max_archived: 50,
            sweep_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 0 = off, 1 = light, 2 = aggressive, 3 = auto
    pub default_level: u8,
    pub check_interval_ms: u64,
    /// Token pacing ceiling for compression jobs (0 = unthrottled)
    pub tokens_per_second: u32,
    pub max_summary_tokens: usize,
    /// System memory usage ratio above which auto mode turns aggressive
    pub pressure_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_level: 1,
            check_interval_ms: 5000,
            tokens_per_second: 100,
            max_summary_tokens: 100,
            pressure_threshold: 0.90,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    /// Transcripts with this many lines or fewer are not summarized
    pub min_history_lines: usize,
    pub min_chars: usize,
    pub max_chars: usize,
    pub max_tokens: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_history_lines: 4,
            min_chars: 50,
            max_chars: 300,
            max_tokens: 160,
            shutdown_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_seconds: 60,
            max_tokens: 256,
            temperature: 0.7,
        }
    }
}

impl Settings {
    /// Load `config/settings.toml` (optional) with `APP__SECTION__KEY` overrides
    pub fn load() -> Result<Self, DialogueError> {
        Self::load_from("config/settings")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, DialogueError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
