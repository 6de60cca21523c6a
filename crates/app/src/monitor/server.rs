//! Actix Web front end for counting, verification, status and settings.
//!
//! Handlers stay thin: uploads are buffered here, the CPU-bound pipeline runs
//! on the blocking pool and results are mapped onto HTTP responses.

use std::{path::PathBuf, sync::Arc};

use actix_multipart::Multipart;
use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, error::InternalError, http::StatusCode, web,
};
use anyhow::{Context, Result};
use futures_util::TryStreamExt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::monitor::{
    config::ServiceConfig,
    data::{FailureResponse, HealthResponse, PredictResponse, SettingsResponse, ThresholdSettings},
    dns,
    engine::EngineSlot,
    inventory::InventoryMonitor,
    pipeline::{Pipeline, PipelineError},
    telemetry::{self, record_request},
};

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

/// Shared state backing HTTP handlers.
pub struct AppState {
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) inventory: Arc<InventoryMonitor>,
    pub(crate) static_dir: PathBuf,
    pub(crate) max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        inventory: Arc<InventoryMonitor>,
        static_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            pipeline,
            inventory,
            static_dir,
            max_upload_bytes,
        }
    }

    /// Wire the engine, inventory and pipeline described by `config`.
    pub fn from_config(config: &ServiceConfig, engine: EngineSlot) -> Self {
        let inventory = Arc::new(InventoryMonitor::new(
            config.thresholds.critical,
            config.thresholds.full,
        ));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(engine),
            Arc::clone(&inventory),
            config.decode,
            config.jpeg_quality,
        ));
        Self::new(
            pipeline,
            inventory,
            config.static_dir.clone(),
            config.max_upload_bytes,
        )
    }
}

#[derive(Debug, Error)]
enum UploadError {
    #[error("no 'file' field in multipart upload")]
    Missing,
    #[error("upload exceeds the {0} byte limit")]
    TooLarge(usize),
    #[error("malformed multipart upload: {0}")]
    Malformed(String),
}

/// Register every route on an Actix service config.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .route("/", web::get().to(index_route))
        .route("/inspector", web::get().to(inspector_route))
        .route("/health", web::get().to(health_handler))
        .route("/status", web::get().to(status_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/predict", web::post().to(predict_handler))
        .route("/verify-image", web::post().to(verify_image_handler))
        .route("/update-settings", web::post().to(update_settings_handler));
}

/// Run the service until the HTTP server exits.
pub fn run(config: ServiceConfig) -> Result<()> {
    if config.metrics_enabled {
        telemetry::init_metrics_recorder();
    }

    dns::register_best_effort(config.duckdns.as_ref());

    let engine = EngineSlot::load(&config.model_path, &config.engine);
    let state = web::Data::new(AppState::from_config(&config, engine));

    info!(
        "serving inventory monitor on http://{}:{} (model ready: {})",
        config.host,
        config.port,
        state.pipeline.is_ready()
    );

    let server_state = state.clone();
    let result = actix_web::rt::System::new().block_on(async move {
        let mut server = HttpServer::new(move || {
            App::new()
                .app_data(server_state.clone())
                .configure(configure)
        });
        if let Some(workers) = config.workers {
            server = server.workers(workers);
        }
        server
            .bind((config.host.as_str(), config.port))
            .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?
            .run()
            .await
            .context("HTTP server error")
    });

    if state.pipeline.is_ready() {
        info!("shutting down; releasing inference engine");
    }
    drop(state);
    result
}

/// Buffer the `file` field, enforcing the upload limit while streaming.
async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Vec<u8>, UploadError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|err| UploadError::Malformed(err.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| UploadError::Malformed(err.to_string()))?
        {
            if data.len() + chunk.len() > limit {
                return Err(UploadError::TooLarge(limit));
            }
            data.extend_from_slice(&chunk);
        }
        return Ok(data);
    }
    Err(UploadError::Missing)
}

/// Run `job` on the blocking pool, folding a panicked or cancelled task into the pipeline error.
async fn run_blocking<T, F>(job: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    web::block(job)
        .await
        .map_err(|err| PipelineError::Aborted(err.to_string()))?
}

fn unready_response(pipeline: &Pipeline) -> HttpResponse {
    let error = match pipeline.unready_reason() {
        Some(reason) => format!("{}: {reason}", PipelineError::ModelUnready),
        None => PipelineError::ModelUnready.to_string(),
    };
    HttpResponse::ServiceUnavailable().json(FailureResponse::new(error))
}

/// Count packages in an upload and update the inventory.
async fn predict_handler(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    if !state.pipeline.is_ready() {
        record_request("predict", "unready");
        return unready_response(&state.pipeline);
    }

    let upload = match read_upload(payload, state.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(err) => {
            record_request("predict", "bad_request");
            return HttpResponse::BadRequest().json(FailureResponse::new(err.to_string()));
        }
    };

    let pipeline = Arc::clone(&state.pipeline);
    match run_blocking(move || pipeline.count_packages(&upload)).await {
        Ok(outcome) => {
            record_request("predict", "ok");
            HttpResponse::Ok().json(PredictResponse::from(outcome))
        }
        Err(PipelineError::ModelUnready) => {
            record_request("predict", "unready");
            unready_response(&state.pipeline)
        }
        Err(err) => {
            warn!("predict failed: {err}");
            record_request("predict", err.kind());
            HttpResponse::Ok().json(FailureResponse::new(err.to_string()))
        }
    }
}

/// Return the upload as JPEG with detections drawn on it.
async fn verify_image_handler(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    if !state.pipeline.is_ready() {
        record_request("verify_image", "unready");
        return unready_response(&state.pipeline);
    }

    let upload = match read_upload(payload, state.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(err) => {
            record_request("verify_image", "bad_request");
            return HttpResponse::BadRequest().json(FailureResponse::new(err.to_string()));
        }
    };

    let pipeline = Arc::clone(&state.pipeline);
    match run_blocking(move || pipeline.verify_image(&upload)).await {
        Ok(jpeg) => {
            record_request("verify_image", "ok");
            HttpResponse::Ok().content_type("image/jpeg").body(jpeg)
        }
        Err(PipelineError::ModelUnready) => {
            record_request("verify_image", "unready");
            unready_response(&state.pipeline)
        }
        Err(err) => {
            error!("verify-image failed: {err}");
            record_request("verify_image", err.kind());
            HttpResponse::InternalServerError().json(FailureResponse::new(err.to_string()))
        }
    }
}

async fn update_settings_handler(
    state: web::Data<AppState>,
    settings: web::Json<ThresholdSettings>,
) -> HttpResponse {
    let settings = settings.into_inner();
    match state.inventory.set_thresholds(settings.min, settings.max) {
        Some(record) => info!(
            "thresholds set to critical={} full={}; status now {:?}",
            settings.min, settings.max, record.status
        ),
        None => info!(
            "thresholds set to critical={} full={} before first check",
            settings.min, settings.max
        ),
    }
    record_request("update_settings", "ok");
    HttpResponse::Ok().json(SettingsResponse {
        success: true,
        updated: settings,
    })
}

fn json_error_handler(err: actix_web::error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    record_request("update_settings", "bad_request");
    let response = HttpResponse::BadRequest().json(FailureResponse::new(err.to_string()));
    InternalError::from_response(err, response).into()
}

async fn health_handler(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "online",
        model_ready: state.pipeline.is_ready(),
    })
}

async fn status_handler(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.inventory.snapshot())
}

/// Prometheus text exposition, or 204 when metrics are disabled.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn index_route(state: web::Data<AppState>) -> HttpResponse {
    static_page(&state, "index.html").await
}

async fn inspector_route(state: web::Data<AppState>) -> HttpResponse {
    static_page(&state, "inspector.html").await
}

async fn static_page(state: &AppState, file_name: &'static str) -> HttpResponse {
    let path = state.static_dir.join(file_name);
    match web::block(move || std::fs::read_to_string(path)).await {
        Ok(Ok(html)) => HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(html),
        Ok(Err(err)) => {
            warn!("static page {file_name} unavailable: {err}");
            HttpResponse::build(StatusCode::NOT_FOUND).body(format!("{file_name} not found"))
        }
        Err(err) => {
            error!("static page task failed: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
