//! Command-line and environment configuration for the monitor service.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};
use clap::Parser;
use ml_core::{DecodeSettings, EngineOptions};

/// Model location relative to the working directory or the executable.
pub const DEFAULT_MODEL_RELATIVE_PATH: &str = "models/production/inventory_monitor_quantized.onnx";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Immutable service settings validated from [`MonitorCliArgs`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub model_path: PathBuf,
    pub engine: EngineOptions,
    pub decode: DecodeSettings,
    pub thresholds: InventoryThresholds,
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,
    pub static_dir: PathBuf,
    pub metrics_enabled: bool,
    pub duckdns: Option<DuckDnsConfig>,
}

/// Startup thresholds for the stock status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryThresholds {
    pub critical: i64,
    pub full: i64,
}

impl Default for InventoryThresholds {
    fn default() -> Self {
        Self {
            critical: 2,
            full: 6,
        }
    }
}

/// Credentials for the dynamic DNS registration performed at startup.
#[derive(Clone)]
pub struct DuckDnsConfig {
    pub domain: String,
    pub token: String,
}

impl fmt::Debug for DuckDnsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckDnsConfig")
            .field("domain", &self.domain)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "inventory-monitor",
    version,
    about = "HTTP service that counts packages on a shelf image and tracks stock status"
)]
pub struct MonitorCliArgs {
    /// Interface to bind the HTTP server to.
    #[arg(long, env = "INVENTORY_HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port to bind the HTTP server to.
    #[arg(long, env = "INVENTORY_PORT", default_value_t = 8000)]
    pub port: u16,
    /// Number of HTTP worker threads (defaults to the number of CPUs).
    #[arg(long, env = "INVENTORY_WORKERS", value_name = "N")]
    pub workers: Option<usize>,
    /// Path to the ONNX detection model.
    #[arg(long = "model", env = "INVENTORY_MODEL", value_name = "PATH")]
    pub model_path: Option<PathBuf>,
    /// Square model input resolution.
    #[arg(long = "input-size", value_name = "PX", default_value_t = 320)]
    pub input_size: u32,
    /// Minimum confidence for a candidate detection.
    #[arg(long, value_name = "SCORE", default_value_t = 0.30)]
    pub confidence: f32,
    /// IoU above which overlapping detections are suppressed.
    #[arg(long, value_name = "IOU", default_value_t = 0.45)]
    pub iou: f32,
    /// Counts at or below this value are CRITICAL.
    #[arg(long = "critical-threshold", value_name = "COUNT", default_value_t = 2)]
    pub critical_threshold: i64,
    /// Counts at or above this value are FULL.
    #[arg(long = "full-capacity", value_name = "COUNT", default_value_t = 6)]
    pub full_capacity: i64,
    /// JPEG quality for annotated verification images (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 95)]
    pub jpeg_quality: i32,
    /// ONNX Runtime intra-op threads.
    #[arg(long = "intra-threads", value_name = "N", default_value_t = 1)]
    pub intra_threads: usize,
    /// ONNX Runtime inter-op threads.
    #[arg(long = "inter-threads", value_name = "N", default_value_t = 1)]
    pub inter_threads: usize,
    /// Let ONNX Runtime schedule independent graph branches in parallel.
    #[arg(long = "parallel-execution", action = clap::ArgAction::SetTrue)]
    pub parallel_execution: bool,
    /// Largest accepted upload in bytes.
    #[arg(long = "max-upload-bytes", value_name = "BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
    /// Directory holding index.html and inspector.html.
    #[arg(long = "static-dir", env = "INVENTORY_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
    /// Skip installing the Prometheus recorder.
    #[arg(long = "no-metrics", action = clap::ArgAction::SetTrue)]
    pub no_metrics: bool,
    #[arg(long = "duckdns-domain", env = "DUCKDNS_DOMAIN", hide = true)]
    pub duckdns_domain: Option<String>,
    #[arg(long = "duckdns-token", env = "DUCKDNS_TOKEN", hide = true, hide_env_values = true)]
    pub duckdns_token: Option<String>,
}

impl TryFrom<MonitorCliArgs> for ServiceConfig {
    type Error = anyhow::Error;

    fn try_from(args: MonitorCliArgs) -> Result<Self> {
        if args.input_size == 0 {
            bail!("--input-size must be a positive integer");
        }
        if !(0.0..=1.0).contains(&args.confidence) {
            bail!("--confidence must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&args.iou) {
            bail!("--iou must be between 0 and 1");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if args.intra_threads == 0 || args.inter_threads == 0 {
            bail!("--intra-threads and --inter-threads must be at least 1");
        }
        if args.workers == Some(0) {
            bail!("--workers must be at least 1");
        }
        if args.max_upload_bytes == 0 {
            bail!("--max-upload-bytes must be at least 1");
        }

        let duckdns = match (args.duckdns_domain, args.duckdns_token) {
            (Some(domain), Some(token)) if !domain.is_empty() && !token.is_empty() => {
                Some(DuckDnsConfig { domain, token })
            }
            _ => None,
        };

        let model_path = resolve_model_path(args.model_path, &default_model_candidates());

        Ok(Self {
            host: args.host,
            port: args.port,
            workers: args.workers,
            model_path,
            engine: EngineOptions {
                intra_threads: args.intra_threads,
                inter_threads: args.inter_threads,
                parallel_execution: args.parallel_execution,
            },
            decode: DecodeSettings {
                input_size: args.input_size,
                confidence_threshold: args.confidence,
                iou_threshold: args.iou,
            },
            thresholds: InventoryThresholds {
                critical: args.critical_threshold,
                full: args.full_capacity,
            },
            jpeg_quality: args.jpeg_quality as u8,
            max_upload_bytes: args.max_upload_bytes,
            static_dir: args.static_dir,
            metrics_enabled: !args.no_metrics,
            duckdns,
        })
    }
}

/// Locations searched for the model when `--model` is not given.
pub fn default_model_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(DEFAULT_MODEL_RELATIVE_PATH)];
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(DEFAULT_MODEL_RELATIVE_PATH));
    }
    candidates
}

/// An explicit path always wins; otherwise the first existing candidate,
/// falling back to the first candidate so the load error names a real path.
pub fn resolve_model_path(explicit: Option<PathBuf>, candidates: &[PathBuf]) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    candidates
        .iter()
        .find(|path| path.is_file())
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_RELATIVE_PATH))
}
