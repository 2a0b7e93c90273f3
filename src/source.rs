use crate::config::{HttpConfig, SourceConfig};
use crate::http::build_client;
use crate::models::ProductRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Anything that can look up a source product by identifier. `None` means
/// the lookup failed; the reason has already been logged.
#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch_product(&self, asin: &str) -> Option<ProductRecord>;
}

#[derive(Debug, Clone)]
pub struct ProductDataClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl ProductDataClient {
    pub fn new(config: &SourceConfig, http: &HttpConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            http: build_client(http),
        }
    }

    pub async fn try_fetch(&self, asin: &str) -> Result<ProductRecord, SourceError> {
        let url = format!("{}/products/{}", self.base_url, encode(asin));
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|err| SourceError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| SourceError::Deserialize(err.to_string()))?;
        Ok(parse_product(&payload))
    }
}

#[async_trait]
impl ProductSource for ProductDataClient {
    async fn fetch_product(&self, asin: &str) -> Option<ProductRecord> {
        match self.try_fetch(asin).await {
            Ok(product) => {
                debug!(target = "relay.source", asin = %asin, title = %product.title, "product_fetched");
                Some(product)
            }
            Err(err) => {
                error!(target = "relay.source", asin = %asin, error = %err, "product_fetch_failed");
                None
            }
        }
    }
}

/// Maps an API payload onto a [`ProductRecord`], defaulting anything absent
/// or of the wrong shape.
pub fn parse_product(data: &Value) -> ProductRecord {
    ProductRecord {
        asin: string_field(data, "asin"),
        title: string_field(data, "title"),
        price: parse_price(data.get("price").and_then(|price| price.get("value"))),
        description: string_field(data, "description"),
        images: string_list(data.get("images")),
        category: string_field(data, "category"),
        features: string_list(data.get("features")),
        specifications: data
            .get("specifications")
            .and_then(Value::as_object)
            .map(|specs| {
                specs
                    .iter()
                    .map(|(name, value)| (name.clone(), scalar_to_string(value)))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn string_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_price(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(raw)) => raw.trim().replace(',', "").parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_stub;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::get,
    };
    use serde_json::json;

    fn client(base_url: String) -> ProductDataClient {
        ProductDataClient::new(
            &SourceConfig {
                base_url,
                api_key: "pd-key".into(),
            },
            &HttpConfig::default(),
        )
    }

    #[test]
    fn parse_full_payload() {
        let payload = json!({
            "asin": "B07XJ8C8F5",
            "title": "Smart speaker",
            "price": {"value": 5980, "currency": "JPY"},
            "description": "Compact speaker",
            "images": ["https://img/1.jpg", "https://img/2.jpg"],
            "category": "Electronics",
            "features": ["Voice control", "Bluetooth"],
            "specifications": {"Weight": "300g", "Ports": 2}
        });
        let product = parse_product(&payload);
        assert_eq!(product.asin, "B07XJ8C8F5");
        assert_eq!(product.price, 5980.0);
        assert_eq!(product.images.len(), 2);
        assert_eq!(product.features, vec!["Voice control", "Bluetooth"]);
        assert_eq!(
            product.specifications,
            vec![
                ("Weight".to_string(), "300g".to_string()),
                ("Ports".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn parse_defaults_missing_fields() {
        let product = parse_product(&json!({"asin": "B0EMPTY"}));
        assert_eq!(product.asin, "B0EMPTY");
        assert_eq!(product.title, "");
        assert_eq!(product.price, 0.0);
        assert!(product.images.is_empty());
        assert!(product.features.is_empty());
        assert!(product.specifications.is_empty());
    }

    #[test]
    fn parse_accepts_string_prices() {
        let product = parse_product(&json!({"price": {"value": "1,299.50"}}));
        assert_eq!(product.price, 1299.5);
        let product = parse_product(&json!({"price": {"value": "n/a"}}));
        assert_eq!(product.price, 0.0);
    }

    #[tokio::test]
    async fn fetch_sends_bearer_token_and_parses() {
        let router = Router::new().route(
            "/products/{asin}",
            get(|Path(asin): Path<String>, headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer pd-key" {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                Ok(Json(json!({"asin": asin, "title": "Fetched"})))
            }),
        );
        let base = spawn_stub(router).await;
        let product = client(base).fetch_product("B0FETCH").await.expect("product");
        assert_eq!(product.asin, "B0FETCH");
        assert_eq!(product.title, "Fetched");
    }

    #[tokio::test]
    async fn fetch_returns_none_on_error_status() {
        let router = Router::new().route(
            "/products/{asin}",
            get(|| async { StatusCode::NOT_FOUND }),
        );
        let base = spawn_stub(router).await;
        let client = client(base);
        assert!(client.fetch_product("B0MISSING").await.is_none());
        let err = client.try_fetch("B0MISSING").await.unwrap_err();
        assert!(matches!(err, SourceError::Status(status) if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn fetch_returns_none_when_unreachable() {
        let client = client("http://127.0.0.1:9".into());
        assert!(client.fetch_product("B0DOWN").await.is_none());
    }
}
