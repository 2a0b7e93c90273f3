use crate::config::{HttpConfig, RakutenConfig};
use crate::http::build_client;
use crate::models::ListingDraft;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(StatusCode),
}

/// Destination marketplace that accepts composed listings.
#[async_trait]
pub trait ListingSink: Send + Sync {
    /// `true` only when the marketplace accepted the item.
    async fn upload(&self, draft: &ListingDraft) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemInsertRequest {
    pub item: ItemPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    pub item_url: String,
    pub item_name: String,
    pub item_price: i64,
    pub item_caption: String,
    pub category_id: String,
    pub images: Vec<ItemImage>,
    pub delivery_flag: u8,
    pub postage_flag: u8,
    pub tax_flag: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemImage {
    pub image_url: String,
}

impl From<&ListingDraft> for ItemInsertRequest {
    fn from(draft: &ListingDraft) -> Self {
        Self {
            item: ItemPayload {
                item_url: draft.item_url.clone(),
                item_name: draft.item_name.clone(),
                item_price: draft.item_price,
                item_caption: draft.item_caption.clone(),
                category_id: draft.category_id.clone(),
                images: draft
                    .images
                    .iter()
                    .map(|url| ItemImage {
                        image_url: url.clone(),
                    })
                    .collect(),
                delivery_flag: draft.delivery_flag,
                postage_flag: draft.postage_flag,
                tax_flag: draft.tax_flag,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RakutenClient {
    base_url: String,
    service_secret: String,
    license_key: String,
    http: Client,
}

impl RakutenClient {
    pub fn new(config: &RakutenConfig, http: &HttpConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            service_secret: config.service_secret.clone(),
            license_key: config.license_key.clone(),
            http: build_client(http),
        }
    }

    fn esa_header(&self) -> String {
        let raw = format!("{}:{}", self.service_secret, self.license_key);
        format!("ESA {}", BASE64.encode(raw))
    }

    pub async fn insert_item(&self, draft: &ListingDraft) -> Result<(), UploadError> {
        let url = format!("{}/item/insert", self.base_url);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.esa_header())
            .json(&ItemInsertRequest::from(draft))
            .send()
            .await
            .map_err(|err| UploadError::Request(err.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(UploadError::Status(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl ListingSink for RakutenClient {
    async fn upload(&self, draft: &ListingDraft) -> bool {
        match self.insert_item(draft).await {
            Ok(()) => {
                info!(target = "relay.rakuten", item_url = %draft.item_url, item_name = %draft.item_name, "item_uploaded");
                true
            }
            Err(err) => {
                error!(target = "relay.rakuten", item_url = %draft.item_url, error = %err, "item_upload_failed");
                false
            }
        }
    }
}
