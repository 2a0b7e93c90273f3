mod category;
mod config;
mod content;
mod http;
mod jobs;
mod llm;
mod metrics;
mod models;
mod page;
mod pipeline;
mod rakuten;
mod source;
mod store;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use category::{CategoryMapping, DEFAULT_CATEGORY_ID};
use config::AppConfig;
use jobs::{JobError, JobInfo, JobQueue};
use models::{
    ApiEnvelope, ApiError, AsinRequest, BatchRequest, ProcessResult, ProductRecord,
    normalize_asins,
};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde::Serialize;
use std::net::SocketAddr;
use store::{ActionLogEntry, ProcessedItemRecord, ProcessingSummary, Store, StoreError};
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const SERVICE_NAME: &str = "listing-relay-rs";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        error!(target = "relay.api", "server crashed: {err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run() -> eyre::Result<()> {
    let config = AppConfig::from_env()?;
    let store = Store::open(&config.database_path)?;
    info!(target = "relay.api", database = %store.path().display(), "store_ready");

    let pipeline = Pipeline::from_config(&config, store);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (queue, worker) = JobQueue::spawn(
        pipeline.clone(),
        config.queue_capacity,
        config.job_retention,
        cancel_rx,
    );

    let app = router(AppState { pipeline, queue });

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "relay.api", provider = ?config.provider, "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(cancel_tx))
        .await?;

    // The router held the last sender, so the worker drains and exits.
    worker.await?;
    info!(target = "relay.api", "shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "relay.api", error = %err, "ctrl_c_listener_failed");
        std::future::pending::<()>().await;
    }
    info!(target = "relay.api", "shutdown requested; cancelling running batches");
    cancel.send_replace(true);
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: JobQueue,
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let api = Router::new()
        .route("/health", get(health))
        .route("/amazon/product", post(fetch_product))
        .route("/rakuten/categories", get(categories))
        .route("/process", post(process_one))
        .route("/batch/process", post(enqueue_batch))
        .route("/jobs/{id}", get(job_status))
        .route("/status", get(processing_status))
        .route("/items/{asin}", get(item_history));

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    service: &'static str,
    timestamp: String,
    llm_provider: &'static str,
    custom_template: bool,
}

/// Liveness check; reports which text provider and template are in use.
async fn health(State(state): State<AppState>) -> Json<ApiEnvelope<HealthReport>> {
    crate::metrics::inc_requests("/api/health");
    Json(ApiEnvelope::ok(HealthReport {
        status: "ok",
        service: SERVICE_NAME,
        timestamp: chrono::Utc::now().to_rfc3339(),
        llm_provider: state.pipeline.llm_provider(),
        custom_template: state.pipeline.has_custom_template(),
    }))
}

/// Looks up source product data without running the pipeline.
///
/// - Method: `POST`
/// - Path: `/api/amazon/product`
/// - Body: `{"asin": "..."}`
async fn fetch_product(
    State(state): State<AppState>,
    Json(payload): Json<AsinRequest>,
) -> Result<Json<ApiEnvelope<ProductRecord>>, AppError> {
    crate::metrics::inc_requests("/api/amazon/product");
    let asin = single_asin(&payload)?;
    match state.pipeline.source().fetch_product(&asin).await {
        Some(product) => Ok(Json(ApiEnvelope::ok(product))),
        None => Err(AppError::NotFound(format!(
            "product data for {asin} could not be fetched"
        ))),
    }
}

#[derive(Debug, Serialize)]
struct CategoryTable {
    mappings: &'static [CategoryMapping],
    default_category_id: &'static str,
}

async fn categories() -> Json<ApiEnvelope<CategoryTable>> {
    crate::metrics::inc_requests("/api/rakuten/categories");
    Json(ApiEnvelope::ok(CategoryTable {
        mappings: category::mappings(),
        default_category_id: DEFAULT_CATEGORY_ID,
    }))
}

/// Runs the full pipeline for one identifier and waits for the result.
///
/// - Method: `POST`
/// - Path: `/api/process`
/// - Body: `{"asin": "..."}`
/// - Response: `ProcessResult`; `success` mirrors the result's own flag
async fn process_one(
    State(state): State<AppState>,
    Json(payload): Json<AsinRequest>,
) -> Result<Json<ApiEnvelope<ProcessResult>>, AppError> {
    crate::metrics::inc_requests("/api/process");
    let asin = single_asin(&payload)?;
    info!(target = "relay.api", asin = %asin, "process requested");
    let result = state.pipeline.process_asin(&asin).await;
    Ok(Json(ApiEnvelope {
        success: result.success,
        message: Some(result.message.clone()),
        data: Some(result),
    }))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
    total: usize,
}

/// Queues a batch; poll `/api/jobs/{id}` for progress.
async fn enqueue_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<ApiEnvelope<EnqueueResponse>>, AppError> {
    crate::metrics::inc_requests("/api/batch/process");
    let asins = normalize_asins(&payload.asins);
    if asins.is_empty() {
        return Err(PipelineError::invalid_input("batch", "asins must not be empty").into());
    }
    let total = asins.len();
    let id = state.queue.enqueue_batch(asins).await?;
    Ok(Json(ApiEnvelope::ok(EnqueueResponse {
        job_id: id.to_string(),
        total,
    })))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiEnvelope<JobInfo>>, AppError> {
    crate::metrics::inc_requests("/api/jobs");
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(PipelineError::invalid_input("jobs", "invalid_job_id").into());
    };
    match state.queue.get(uuid).await {
        Some(info) => Ok(Json(ApiEnvelope::ok(info))),
        None => Err(AppError::NotFound(format!("job {id} not found"))),
    }
}

async fn processing_status(
    State(state): State<AppState>,
) -> Result<Json<ApiEnvelope<ProcessingSummary>>, AppError> {
    crate::metrics::inc_requests("/api/status");
    let summary = state.pipeline.processing_summary().await?;
    Ok(Json(ApiEnvelope::ok(summary)))
}

#[derive(Debug, Serialize)]
struct ItemHistory {
    item: Option<ProcessedItemRecord>,
    actions: Vec<ActionLogEntry>,
}

/// Final status and the full audit trail for one identifier.
async fn item_history(
    State(state): State<AppState>,
    Path(asin): Path<String>,
) -> Result<Json<ApiEnvelope<ItemHistory>>, AppError> {
    crate::metrics::inc_requests("/api/items");
    let asin = single_asin(&AsinRequest { asin })?;
    let lookup = asin.clone();
    let history = state
        .pipeline
        .store()
        .blocking(move |store| {
            Ok(ItemHistory {
                item: store.item(&lookup)?,
                actions: store.actions_for(&lookup)?,
            })
        })
        .await?;
    if history.item.is_none() && history.actions.is_empty() {
        return Err(AppError::NotFound(format!("no history for {asin}")));
    }
    Ok(Json(ApiEnvelope::ok(history)))
}

fn single_asin(payload: &AsinRequest) -> Result<String, AppError> {
    normalize_asins([&payload.asin])
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::invalid_input("request", "asin must not be empty").into())
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    NotFound(String),
    Store(StoreError),
    Jobs(JobError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<JobError> for AppError {
    fn from(value: JobError) -> Self {
        Self::Jobs(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ApiError {
                        error: err.stage().to_string(),
                        detail: Some(err.detail().to_string()),
                    },
                )
            }
            AppError::NotFound(detail) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: Some(detail),
                },
            ),
            AppError::Store(err) => {
                error!(target = "relay.api", error = %err, "store_error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: "store".into(),
                        detail: Some(err.to_string()),
                    },
                )
            }
            AppError::Jobs(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError {
                    error: "jobs".into(),
                    detail: Some(err.to_string()),
                },
            ),
        };
        let envelope = ApiEnvelope {
            success: false,
            message: payload.detail.clone(),
            data: Some(payload),
        };
        (status, Json(envelope)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
