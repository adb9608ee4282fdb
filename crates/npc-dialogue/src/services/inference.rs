use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

/// Generated text, one piece per decoded token
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Text generation backend. Calls may take seconds and must stay off the
/// foreground loop.
#[async_trait::async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate_stream(&self, prompt: &str, max_tokens: usize) -> Result<TokenStream>;

    async fn generate_text(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let mut stream = self.generate_stream(prompt, max_tokens).await?;
        let mut text = String::new();
        while let Some(piece) = stream.next().await {
            text.push_str(&piece?);
        }
        Ok(text)
    }
}
