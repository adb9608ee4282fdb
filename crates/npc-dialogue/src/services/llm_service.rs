use anyhow::Result;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use super::inference::{InferenceEngine, TokenStream};
use crate::config::LlmConfig;
use crate::error::DialogueError;

#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Token(String),
    Done,
}

/// Parse one `data: {...}` line of an OpenAI-style completion stream
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let chunk: CompletionResponse = serde_json::from_str(data).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.text)
        .filter(|t| !t.is_empty())
        .map(SseEvent::Token)
}

/// Move every complete line out of `buffer` into `pending`. Bytes are only
/// decoded per whole line so multibyte characters split across network
/// chunks survive. Returns true once `[DONE]` was seen.
fn drain_sse_lines(buffer: &mut Vec<u8>, pending: &mut VecDeque<String>) -> bool {
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
            Some(SseEvent::Token(text)) => pending.push_back(text),
            Some(SseEvent::Done) => return true,
            None => {}
        }
    }
    false
}

/// Completion client for a llama-server style `/v1/completions` endpoint
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self, DialogueError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn post(&self, prompt: &str, max_tokens: usize, stream: bool) -> Result<reqwest::Response, DialogueError> {
        let request = CompletionRequest {
            prompt,
            max_tokens: max_tokens.min(self.config.max_tokens),
            temperature: self.config.temperature,
            stream,
        };

        let response = self.client.post(self.endpoint()).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DialogueError::Inference(format!("LLM API error: {} - {}", status, body)));
        }
        Ok(response)
    }

    /// Full completion in one response
    pub async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, DialogueError> {
        debug!("Requesting completion ({} chars prompt)", prompt.len());
        let response: CompletionResponse = self.post(prompt, max_tokens, false).await?.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.text)
            .ok_or_else(|| DialogueError::Inference("No choices returned from LLM".to_string()))
    }
}

#[async_trait::async_trait]
impl InferenceEngine for LlmService {
    async fn generate_stream(&self, prompt: &str, max_tokens: usize) -> Result<TokenStream> {
        debug!("Starting completion stream ({} chars prompt)", prompt.len());
        let bytes = Box::pin(self.post(prompt, max_tokens, true).await?.bytes_stream());

        // (body, partial line, decoded tokens not yet yielded, finished)
        let state = (bytes, Vec::<u8>::new(), VecDeque::<String>::new(), false);
        let tokens = futures::stream::unfold(state, |(mut bytes, mut buffer, mut pending, mut done)| async move {
            loop {
                if let Some(token) = pending.pop_front() {
                    return Some((Ok(token), (bytes, buffer, pending, done)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                        done = drain_sse_lines(&mut buffer, &mut pending);
                    }
                    Some(Err(e)) => {
                        let err = anyhow::anyhow!("Stream error: {}", e);
                        return Some((Err(err), (bytes, buffer, pending, true)));
                    }
                    None => done = true,
                }
            }
        });

        Ok(Box::pin(tokens))
    }

    async fn generate_text(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        Ok(self.complete(prompt, max_tokens).await?)
    }
}
