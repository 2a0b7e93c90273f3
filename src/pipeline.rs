use crate::category::map_category;
use crate::config::AppConfig;
use crate::content::ContentGenerator;
use crate::llm;
use crate::models::{ListingDraft, ProcessResult, ProductRecord};
use crate::page::PageRenderer;
use crate::rakuten::{ListingSink, RakutenClient};
use crate::source::{ProductDataClient, ProductSource};
use crate::store::{ActionStatus, ItemStatus, ProcessingSummary, Store, StoreError};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};

/// Listing price is the source price plus a 20% margin, floored to whole yen.
pub const MARGIN_PERCENT: i64 = 120;
pub const DELIVERY_INCLUDED: u8 = 1;
pub const FREE_POSTAGE: u8 = 0;
pub const TAX_INCLUDED: u8 = 1;

const ACTION_FETCH: &str = "fetch_source_data";
const ACTION_GENERATE: &str = "ai_generation";
const ACTION_PAGE: &str = "generate_page";
const ACTION_UPLOAD: &str = "upload_listing";
const ACTION_COMPLETE: &str = "process_complete";
const ACTION_ERROR: &str = "process_error";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub shop_url: String,
    pub pacing_delay: Duration,
}

/// Sequences fetch → category → copy → draft → page → upload for each
/// identifier and records every step in the [`Store`].
#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn ProductSource>,
    content: ContentGenerator,
    renderer: PageRenderer,
    sink: Arc<dyn ListingSink>,
    store: Store,
    settings: PipelineSettings,
    turn: Arc<Mutex<()>>,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<ProcessResult>,
    pub cancelled: bool,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ProductSource>,
        content: ContentGenerator,
        renderer: PageRenderer,
        sink: Arc<dyn ListingSink>,
        store: Store,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            content,
            renderer,
            sink,
            store,
            settings,
            turn: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(config: &AppConfig, store: Store) -> Self {
        Self::new(
            Arc::new(ProductDataClient::new(&config.source, &config.http)),
            ContentGenerator::new(llm::from_config(config)),
            PageRenderer::new(&config.template_path, &config.output_dir),
            Arc::new(RakutenClient::new(&config.rakuten, &config.http)),
            store,
            PipelineSettings {
                shop_url: config.rakuten.shop_url.clone(),
                pacing_delay: config.pacing_delay,
            },
        )
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn source(&self) -> &dyn ProductSource {
        self.source.as_ref()
    }

    pub fn llm_provider(&self) -> &'static str {
        self.content.provider()
    }

    pub fn has_custom_template(&self) -> bool {
        self.renderer.has_custom_template()
    }

    pub async fn processing_summary(&self) -> Result<ProcessingSummary, StoreError> {
        self.store.blocking(Store::summary).await
    }

    /// Runs the whole pipeline for one identifier. Never fails: every error
    /// ends up as an unsuccessful [`ProcessResult`] with a readable message.
    ///
    /// Runs are serialized across every clone of this pipeline, so single
    /// requests and batch items never overlap.
    pub async fn process_asin(&self, asin: &str) -> ProcessResult {
        let _turn = self.turn.lock().await;
        match self.run(asin).await {
            Ok(result) => result,
            Err(err) => {
                warn!(target = "relay.pipeline", asin = %asin, stage = err.stage(), error = %err, "process_error");
                if let Err(log_err) = self
                    .record(asin, ACTION_ERROR, ActionStatus::Error, err.detail())
                    .await
                {
                    warn!(target = "relay.store", asin = %asin, error = %log_err, "action_log_write_failed");
                }
                if let Err(mark_err) = self.mark(asin, ItemStatus::Failed).await {
                    warn!(target = "relay.store", asin = %asin, error = %mark_err, "item_status_write_failed");
                }
                ProcessResult::failed(asin, format!("processing error: {}", err.detail()))
            }
        }
    }

    /// Processes identifiers one at a time with the pacing delay between
    /// consecutive items.
    pub async fn bulk_process_asins(&self, asins: &[String]) -> Vec<ProcessResult> {
        let (_keep_open, cancel) = watch::channel(false);
        self.bulk_process_until(asins, cancel).await.results
    }

    /// Like [`Pipeline::bulk_process_asins`], but stops before the next item
    /// once `cancel` turns `true`. An item already in flight runs to the end.
    pub async fn bulk_process_until(
        &self,
        asins: &[String],
        mut cancel: watch::Receiver<bool>,
    ) -> BatchOutcome {
        let mut results = Vec::with_capacity(asins.len());
        let mut cancelled = false;
        for (idx, asin) in asins.iter().enumerate() {
            if idx > 0 {
                tokio::select! {
                    _ = sleep(self.settings.pacing_delay) => {}
                    _ = cancellation(&mut cancel) => {}
                }
            }
            if *cancel.borrow() {
                cancelled = true;
                break;
            }
            info!(target = "relay.pipeline", asin = %asin, position = idx + 1, total = asins.len(), "processing_asin");
            results.push(self.process_asin(asin).await);
        }
        if cancelled {
            warn!(
                target = "relay.pipeline",
                processed = results.len(),
                total = asins.len(),
                "batch_cancelled"
            );
        }
        BatchOutcome { results, cancelled }
    }

    async fn run(&self, asin: &str) -> Result<ProcessResult, PipelineError> {
        self.record(asin, ACTION_FETCH, ActionStatus::Start, "fetching source product data").await?;
        let fetched = timed("fetch", self.source.fetch_product(asin)).await;
        let Some(product) = fetched else {
            self.record(asin, ACTION_FETCH, ActionStatus::Failed, "source product data unavailable").await?;
            self.mark(asin, ItemStatus::Failed).await?;
            return Ok(ProcessResult::failed(
                asin,
                "failed to fetch source product data",
            ));
        };
        self.record(asin, ACTION_FETCH, ActionStatus::Success, &product.title).await?;

        let category_id = map_category(&product.category);
        debug!(target = "relay.pipeline", asin = %asin, category = %product.category, category_id, "category_mapped");

        self.record(asin, ACTION_GENERATE, ActionStatus::Start, "generating listing copy").await?;
        let title = timed("generate_title", self.content.generate_title(&product)).await;
        let description = timed(
            "generate_description",
            self.content.generate_description(&product),
        )
        .await;
        let generation_fallback = title.fallback || description.fallback;
        let note = match (title.fallback, description.fallback) {
            (false, false) => "title and description generated",
            (true, false) => "title fell back to placeholder",
            (false, true) => "description fell back to placeholder",
            (true, true) => "title and description fell back to placeholder",
        };
        self.record(asin, ACTION_GENERATE, ActionStatus::Success, note).await?;

        let draft = build_draft(asin, &product, title.text, description.text, category_id);

        self.record(asin, ACTION_PAGE, ActionStatus::Start, "rendering gold page").await?;
        let started = Instant::now();
        let renderer = self.renderer.clone();
        let (run_asin, page_product, page_draft) =
            (asin.to_string(), product.clone(), draft.clone());
        let page_path = tokio::task::spawn_blocking(move || {
            renderer.render(&run_asin, &page_product, &page_draft)
        })
        .await
        .map_err(|err| PipelineError::internal("render_page", err.to_string()))?
        .map_err(|err| PipelineError::internal("render_page", err.to_string()))?;
        crate::metrics::stage_elapsed("render_page", started.elapsed().as_millis());
        let page_path = page_path.display().to_string();
        self.record(asin, ACTION_PAGE, ActionStatus::Success, &page_path).await?;

        self.record(asin, ACTION_UPLOAD, ActionStatus::Start, "uploading listing").await?;
        if !timed("upload", self.sink.upload(&draft)).await {
            self.record(asin, ACTION_UPLOAD, ActionStatus::Failed, "marketplace rejected the listing").await?;
            self.mark(asin, ItemStatus::Failed).await?;
            return Ok(ProcessResult::failed(asin, "failed to upload listing"));
        }

        self.mark(asin, ItemStatus::Completed).await?;
        self.record(asin, ACTION_COMPLETE, ActionStatus::Success, "processing complete").await?;

        Ok(ProcessResult {
            asin: asin.to_string(),
            success: true,
            message: "listing generated and uploaded".into(),
            rakuten_url: Some(format!("{}/{}/", self.settings.shop_url, draft.item_url)),
            gold_page_path: Some(page_path),
            generation_fallback,
        })
    }

    async fn record(
        &self,
        asin: &str,
        action: &'static str,
        status: ActionStatus,
        message: &str,
    ) -> Result<(), PipelineError> {
        let (owned_asin, owned_message) = (asin.to_string(), message.to_string());
        self.store
            .blocking(move |store| store.log_action(&owned_asin, action, status, &owned_message))
            .await
            .map_err(|err| PipelineError::internal("store", err.to_string()))?;
        info!(target = "relay.pipeline", asin = %asin, action, status = status.as_str(), message, "action_logged");
        Ok(())
    }

    async fn mark(&self, asin: &str, status: ItemStatus) -> Result<(), PipelineError> {
        let owned_asin = asin.to_string();
        self.store
            .blocking(move |store| store.upsert_item(&owned_asin, &item_url_slug(&owned_asin), status))
            .await
            .map_err(|err| PipelineError::internal("store", err.to_string()))
    }
}

pub fn item_url_slug(asin: &str) -> String {
    format!("product-{}", asin.to_lowercase())
}

pub fn listing_price(source_price: f64) -> i64 {
    (source_price * MARGIN_PERCENT as f64 / 100.0).floor() as i64
}

pub fn build_draft(
    asin: &str,
    product: &ProductRecord,
    title: String,
    description: String,
    category_id: &str,
) -> ListingDraft {
    ListingDraft {
        item_url: item_url_slug(asin),
        item_name: title,
        item_price: listing_price(product.price),
        item_caption: description,
        category_id: category_id.to_string(),
        images: product.images.clone(),
        delivery_flag: DELIVERY_INCLUDED,
        postage_flag: FREE_POSTAGE,
        tax_flag: TAX_INCLUDED,
    }
}

async fn timed<T, Fut>(name: &'static str, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let started = Instant::now();
    let value = fut.await;
    crate::metrics::stage_elapsed(name, started.elapsed().as_millis());
    value
}

/// Resolves once the flag turns `true`; never resolves if the sender is gone.
async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
