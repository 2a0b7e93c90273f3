use super::{LlmError, TextGenerator};
use crate::config::{ClaudeConfig, HttpConfig};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

pub struct ClaudeClient {
    http: Client,
    config: ClaudeConfig,
}

impl ClaudeClient {
    pub fn new(config: &ClaudeConfig, http: &HttpConfig) -> Self {
        Self {
            http: build_client(http),
            config: config.clone(),
        }
    }
}

#[async_trait]
impl TextGenerator for ClaudeClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if self.config.api_key.trim().is_empty() {
            return Err(LlmError::MissingKey);
        }

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        payload
            .content
            .into_iter()
            .find(|block| block.r#type == "text")
            .map(|block| block.text)
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))
    }

    fn provider(&self) -> &'static str {
        "claude"
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    #[serde(default)]
    text: String,
}
