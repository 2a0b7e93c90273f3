pub mod claude;
pub mod gemini;

use crate::config::{AppConfig, LlmProvider};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use claude::ClaudeClient;
pub use gemini::GeminiClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing api key")]
    MissingKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A single-prompt text completion backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    fn provider(&self) -> &'static str;
}

pub fn from_config(config: &AppConfig) -> Arc<dyn TextGenerator> {
    match (config.provider, &config.claude) {
        (LlmProvider::Claude, Some(claude)) => Arc::new(ClaudeClient::new(claude, &config.http)),
        _ => Arc::new(GeminiClient::new(&config.gemini, &config.http)),
    }
}
