use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use serde_with::skip_serializing_none;

/// Normalized source-marketplace product as returned by the product-data API.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProductRecord {
    pub asin: String,
    pub title: String,
    pub price: f64,
    pub description: String,
    pub images: Vec<String>,
    pub category: String,
    pub features: Vec<String>,
    /// Name/value pairs in the order the source API returned them.
    #[serde(serialize_with = "serialize_pairs")]
    pub specifications: Vec<(String, String)>,
}

fn serialize_pairs<S>(pairs: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (key, value) in pairs {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Destination listing composed from a product plus generated copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingDraft {
    pub item_url: String,
    pub item_name: String,
    pub item_price: i64,
    pub item_caption: String,
    pub category_id: String,
    pub images: Vec<String>,
    pub delivery_flag: u8,
    pub postage_flag: u8,
    pub tax_flag: u8,
}

/// Outcome of one pipeline run for a single identifier.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessResult {
    pub asin: String,
    pub success: bool,
    pub message: String,
    pub rakuten_url: Option<String>,
    pub gold_page_path: Option<String>,
    pub generation_fallback: bool,
}

impl ProcessResult {
    pub fn failed(asin: &str, message: impl Into<String>) -> Self {
        Self {
            asin: asin.to_string(),
            success: false,
            message: message.into(),
            rakuten_url: None,
            gold_page_path: None,
            generation_fallback: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response wrapper the browser client expects: `{success, data, message}`.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsinRequest {
    pub asin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub asins: Vec<String>,
}

/// Trims, upper-cases and drops empty identifiers.
pub fn normalize_asins<'a>(raw: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    raw.into_iter()
        .map(|asin| asin.trim().to_uppercase())
        .filter(|asin| !asin.is_empty())
        .collect()
}
