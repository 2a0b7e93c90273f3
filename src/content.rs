use crate::llm::TextGenerator;
use crate::models::ProductRecord;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::error;

pub const TITLE_MAX_CHARS: usize = 50;
pub const DESCRIPTION_MIN_CHARS: usize = 1000;

/// Generated copy plus whether it is the failure placeholder rather than
/// provider output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedText {
    pub text: String,
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Title,
    Description,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Title => "title",
            ContentKind::Description => "description",
        }
    }
}

pub fn placeholder(kind: ContentKind) -> String {
    format!("自動生成に失敗しました: {}", kind.as_str())
}

#[derive(Clone)]
pub struct ContentGenerator {
    llm: Arc<dyn TextGenerator>,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    pub fn provider(&self) -> &'static str {
        self.llm.provider()
    }

    pub async fn generate_title(&self, product: &ProductRecord) -> GeneratedText {
        self.call(&title_prompt(product), ContentKind::Title).await
    }

    pub async fn generate_description(&self, product: &ProductRecord) -> GeneratedText {
        self.call(&description_prompt(product), ContentKind::Description)
            .await
    }

    /// Provider failures never surface as errors: they are logged and turned
    /// into the placeholder text.
    async fn call(&self, prompt: &str, kind: ContentKind) -> GeneratedText {
        match self.llm.generate(prompt).await {
            Ok(text) => GeneratedText {
                text: text.trim().to_string(),
                fallback: false,
            },
            Err(err) => {
                error!(
                    target = "relay.llm",
                    provider = self.llm.provider(),
                    content_type = kind.as_str(),
                    error = %err,
                    "ai_generation_failed"
                );
                GeneratedText {
                    text: placeholder(kind),
                    fallback: true,
                }
            }
        }
    }
}

pub fn title_prompt(product: &ProductRecord) -> String {
    let top_features: Vec<&str> = product.features.iter().take(3).map(String::as_str).collect();
    format!(
        "以下のAmazon商品情報から、楽天市場向けのSEO最適化されたタイトルを生成してください。\n\
         \n\
         商品名: {title}\n\
         カテゴリ: {category}\n\
         価格: {price}\n\
         特徴: {features}\n\
         \n\
         要件:\n\
         - {max}文字以内\n\
         - 楽天市場で検索されやすいキーワードを含む\n\
         - 【送料無料】【即納】などの楽天らしい表現を含む\n\
         - 商品の魅力を最大限アピール\n\
         \n\
         楽天用タイトル:",
        title = product.title,
        category = product.category,
        price = format_yen(product.price.round() as i64),
        features = top_features.join(", "),
        max = TITLE_MAX_CHARS,
    )
}

pub fn description_prompt(product: &ProductRecord) -> String {
    let specs: Map<String, Value> = product
        .specifications
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    format!(
        "以下のAmazon商品情報から、楽天市場向けの魅力的な商品説明文を生成してください。\n\
         \n\
         商品名: {title}\n\
         説明: {description}\n\
         特徴: {features}\n\
         仕様: {specs}\n\
         \n\
         要件:\n\
         - HTMLタグを使用した見やすいレイアウト\n\
         - 楽天市場のユーザーに響く表現\n\
         - 購買意欲を高める内容\n\
         - {min}文字以上の詳細な説明\n\
         - 商品の利用シーンや効果を具体的に記載\n\
         \n\
         楽天用商品説明文:",
        title = product.title,
        description = product.description,
        features = product.features.join(", "),
        specs = Value::Object(specs),
        min = DESCRIPTION_MIN_CHARS,
    )
}

/// `¥` prefix with thousands separators, e.g. `¥12,345`.
pub fn format_yen(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-¥{grouped}")
    } else {
        format!("¥{grouped}")
    }
}
