//! Background inference work around live conversations

pub mod inference;
pub mod llm_service;
pub mod optimizer;
pub mod pressure;
pub mod prompt_builder;
pub mod reply;
pub mod summarizer;

pub use inference::{InferenceEngine, TokenStream};
pub use llm_service::LlmService;
pub use optimizer::{CompressionCoordinator, OptimizationLevel, OptimizationProfile};
pub use pressure::MemoryPressureProbe;
pub use reply::ReplyDispatcher;
pub use summarizer::ConversationSummarizer;
