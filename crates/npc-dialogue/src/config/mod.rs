pub mod settings;

pub use settings::{
    ConversationConfig, LlmConfig, MaintenanceConfig, OptimizerConfig, Settings, SummaryConfig,
};
