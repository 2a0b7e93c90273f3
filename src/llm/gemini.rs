use super::{LlmError, TextGenerator};
use crate::config::{GeminiConfig, HttpConfig};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, http: &HttpConfig) -> Self {
        Self {
            http: build_client(http),
            config: config.clone(),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            return Err(LlmError::MissingKey);
        }

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let response = self
            .http
            .post(url)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<String>()
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))?;

        Ok(text)
    }

    fn provider(&self) -> &'static str {
        "gemini"
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_stub;
    use axum::{
        Json, Router,
        extract::Query,
        http::StatusCode,
        routing::post,
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn client(base_url: String) -> GeminiClient {
        GeminiClient::new(
            &GeminiConfig {
                base_url,
                api_key: "gm-key".into(),
                model: "gemini-pro".into(),
            },
            &HttpConfig::default(),
        )
    }

    #[tokio::test]
    async fn joins_candidate_parts() {
        let router = Router::new().route(
            "/v1beta/models/{call}",
            post(
                |Query(query): Query<HashMap<String, String>>, Json(body): Json<Value>| async move {
                    if query.get("key").map(String::as_str) != Some("gm-key") {
                        return Err(StatusCode::FORBIDDEN);
                    }
                    let prompt = body["contents"][0]["parts"][0]["text"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    Ok(Json(json!({
                        "candidates": [{"content": {"parts": [{"text": "echo: "}, {"text": prompt}]}}]
                    })))
                },
            ),
        );
        let base = spawn_stub(router).await;
        let text = client(base).generate("hello").await.expect("text");
        assert_eq!(text, "echo: hello");
    }

    #[tokio::test]
    async fn empty_candidates_are_invalid() {
        let router = Router::new().route(
            "/v1beta/models/{call}",
            post(|| async { Json(json!({"candidates": []})) }),
        );
        let base = spawn_stub(router).await;
        let err = client(base).generate("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn error_status_is_http_error() {
        let router = Router::new().route(
            "/v1beta/models/{call}",
            post(|| async { StatusCode::TOO_MANY_REQUESTS }),
        );
        let base = spawn_stub(router).await;
        let err = client(base).generate("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::Http(msg) if msg.contains("429")));
    }
}
