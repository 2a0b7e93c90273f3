use crate::content::format_yen;
use crate::models::{ListingDraft, ProductRecord};
use chrono::{Local, NaiveDate};
use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
};
use thiserror::Error;
use tracing::info;

const MAX_GALLERY_IMAGES: usize = 4;
const META_DESCRIPTION_CHARS: usize = 150;
const NO_FEATURES_HTML: &str = "<p>特徴情報がありません</p>";
const NO_SPECS_HTML: &str = "<p>仕様情報がありません</p>";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read template {path}: {source}")]
    Template { path: PathBuf, source: io::Error },
    #[error("failed to write page {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct PageRenderer {
    template_path: PathBuf,
    output_dir: PathBuf,
}

impl PageRenderer {
    pub fn new(template_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Renders the listing page for today and writes it to
    /// `{output_dir}/{asin}_{YYYYMMDD}.html`, replacing a same-day page.
    /// `asin` is the identifier the run was started with, not whatever the
    /// source payload carried.
    pub fn render(
        &self,
        asin: &str,
        product: &ProductRecord,
        draft: &ListingDraft,
    ) -> Result<PathBuf, RenderError> {
        self.render_on(asin, product, draft, Local::now().date_naive())
    }

    pub fn render_on(
        &self,
        asin: &str,
        product: &ProductRecord,
        draft: &ListingDraft,
        date: NaiveDate,
    ) -> Result<PathBuf, RenderError> {
        let template = self.load_template()?;
        let html = fill_template(&template, &page_fields(product, draft, date));

        fs::create_dir_all(&self.output_dir).map_err(|source| RenderError::Write {
            path: self.output_dir.clone(),
            source,
        })?;
        let path = self.output_path(asin, date);
        fs::write(&path, html).map_err(|source| RenderError::Write {
            path: path.clone(),
            source,
        })?;

        info!(target = "relay.page", asin = %asin, path = %path.display(), "gold_page_written");
        Ok(path)
    }

    pub fn output_path(&self, asin: &str, date: NaiveDate) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.html", asin, date.format("%Y%m%d")))
    }

    /// Whether a template file is present; otherwise the built-in default is used.
    pub fn has_custom_template(&self) -> bool {
        self.template_path.is_file()
    }

    fn load_template(&self) -> Result<String, RenderError> {
        if !self.has_custom_template() {
            return Ok(DEFAULT_TEMPLATE.to_string());
        }
        fs::read_to_string(&self.template_path).map_err(|source| RenderError::Template {
            path: self.template_path.clone(),
            source,
        })
    }
}

fn page_fields(
    product: &ProductRecord,
    draft: &ListingDraft,
    date: NaiveDate,
) -> HashMap<&'static str, String> {
    let main_image = draft.images.first().cloned().unwrap_or_default();
    let main_image_html = if main_image.is_empty() {
        String::new()
    } else {
        format!(
            r#"<img src="{}" alt="{}" style="width: 100%; max-width: 500px;">"#,
            escape_html(&main_image),
            escape_html(&draft.item_name)
        )
    };
    let top_features: Vec<&str> = product.features.iter().take(3).map(String::as_str).collect();

    let mut fields = HashMap::new();
    fields.insert("item_name", escape_html(&draft.item_name));
    fields.insert("item_price", format_yen(draft.item_price));
    // Generated caption is HTML by contract.
    fields.insert("item_caption", draft.item_caption.clone());
    fields.insert("main_image", escape_html(&main_image));
    fields.insert("main_image_html", main_image_html);
    fields.insert("sub_images", image_gallery(draft.images.get(1..).unwrap_or_default()));
    fields.insert("product_features", features_html(&product.features));
    fields.insert("specifications", specs_table(&product.specifications));
    fields.insert("related_products", RELATED_PRODUCTS_HTML.to_string());
    fields.insert("current_date", date.format("%Y年%m月%d日").to_string());
    fields.insert(
        "meta_description",
        escape_html(&truncate_chars(&product.description, META_DESCRIPTION_CHARS)),
    );
    fields.insert(
        "meta_keywords",
        escape_html(&format!("{}, 楽天, {}", product.category, top_features.join(", "))),
    );
    fields.insert("item_url", escape_html(&draft.item_url));
    fields.insert("item_price_numeric", draft.item_price.to_string());
    fields
}

/// Substitutes `{name}` placeholders. `{{` and `}}` produce literal braces;
/// placeholders with no matching field are kept as written.
pub fn fill_template(template: &str, fields: &HashMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(template.len() + 1024);
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
        } else {
            let name_len = tail[1..]
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(tail.len() - 1);
            let name = &tail[1..1 + name_len];
            let closed = tail[1 + name_len..].starts_with('}');
            match fields.get(name) {
                Some(value) if closed && !name.is_empty() => {
                    out.push_str(value);
                    rest = &tail[name_len + 2..];
                }
                _ => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
    }
    out.push_str(rest);
    out
}

fn image_gallery(images: &[String]) -> String {
    images
        .iter()
        .take(MAX_GALLERY_IMAGES)
        .map(|url| {
            format!(
                "<img src=\"{}\" style=\"width: 100%; margin-bottom: 10px;\">\n",
                escape_html(url)
            )
        })
        .collect()
}

fn features_html(features: &[String]) -> String {
    if features.is_empty() {
        return NO_FEATURES_HTML.to_string();
    }
    let mut html = String::from("<ul>\n");
    for feature in features {
        html.push_str(&format!("<li>{}</li>\n", escape_html(feature)));
    }
    html.push_str("</ul>");
    html
}

fn specs_table(specs: &[(String, String)]) -> String {
    if specs.is_empty() {
        return NO_SPECS_HTML.to_string();
    }
    let mut html = String::from("<table class=\"specs-table\">\n");
    for (name, value) in specs {
        html.push_str(&format!(
            "<tr><th>{}</th><td>{}</td></tr>\n",
            escape_html(name),
            escape_html(value)
        ));
    }
    html.push_str("</table>");
    html
}

fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            // Keeps interpolated text from being re-read as a placeholder.
            '{' => out.push_str("&#123;"),
            '}' => out.push_str("&#125;"),
            other => out.push(other),
        }
    }
    out
}

const RELATED_PRODUCTS_HTML: &str = r#"
        <div style="display: grid; grid-template-columns: repeat(4, 1fr); gap: 20px;">
            <div class="related-item" style="text-align: center; border: 1px solid #ddd; padding: 10px;"><p>関連商品1</p></div>
            <div class="related-item" style="text-align: center; border: 1px solid #ddd; padding: 10px;"><p>関連商品2</p></div>
            <div class="related-item" style="text-align: center; border: 1px solid #ddd; padding: 10px;"><p>関連商品3</p></div>
            <div class="related-item" style="text-align: center; border: 1px solid #ddd; padding: 10px;"><p>関連商品4</p></div>
        </div>
"#;

pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="ja">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta name="description" content="{meta_description}">
    <meta name="keywords" content="{meta_keywords}">
    <title>{item_name}</title>
    <style>
        body {{ font-family: "Hiragino Sans", "ヒラギノ角ゴ ProN W3", sans-serif; }}
        .container {{ max-width: 1000px; margin: 0 auto; padding: 20px; }}
        .product-header {{ text-align: center; margin-bottom: 30px; }}
        .product-title {{ font-size: 28px; color: #c41230; font-weight: bold; }}
        .product-price {{ font-size: 36px; color: #e60012; margin: 20px 0; }}
        .product-images {{ display: flex; gap: 20px; margin: 30px 0; }}
        .main-image {{ flex: 2; }}
        .sub-images {{ flex: 1; }}
        .features {{ background: #f8f8f8; padding: 20px; margin: 30px 0; }}
        .specs-table {{ width: 100%; border-collapse: collapse; margin: 30px 0; }}
        .specs-table th, .specs-table td {{ border: 1px solid #ddd; padding: 10px; }}
        .buy-button {{ background: #e60012; color: white; padding: 15px 30px; font-size: 18px; }}
    </style>
</head>
<body>
    <div class="container" data-item-url="{item_url}" data-price="{item_price_numeric}">
        <div class="product-header">
            <h1 class="product-title">{item_name}</h1>
            <div class="product-price">{item_price}</div>
        </div>

        <div class="product-images">
            <div class="main-image">
                {main_image_html}
            </div>
            <div class="sub-images">
                {sub_images}
            </div>
        </div>

        <div class="product-description">
            {item_caption}
        </div>

        <div class="features">
            <h3>商品の特徴</h3>
            {product_features}
        </div>

        <div class="specifications">
            <h3>商品仕様</h3>
            {specifications}
        </div>

        <div class="related-products">
            <h3>関連商品</h3>
            {related_products}
        </div>

        <div style="text-align: center; margin: 50px 0;">
            <button class="buy-button">今すぐ購入</button>
        </div>

        <div style="text-align: center; color: #666; margin-top: 50px;">
            最終更新: {current_date}
        </div>
    </div>
</body>
</html>"#;
