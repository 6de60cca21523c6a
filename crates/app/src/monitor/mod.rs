//! Inventory monitor service: counts packages in shelf photos and tracks a
//! stock status over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI and environment configuration.
//! - `engine`: Process-wide slot holding the (possibly absent) model.
//! - `inventory`: Stock status machine and bounded history.
//! - `pipeline`: Decode → infer → post-process orchestration.
//! - `annotation`: Box drawing and JPEG encoding for verification images.
//! - `server`: Actix Web endpoints.
//! - `telemetry`: Tracing subscriber and Prometheus recorder.
//! - `dns`: Optional DuckDNS registration at startup.
//! - `data`: Response and request bodies.

/// Re-export service settings so callers can configure runs without reaching
/// into submodules.
pub use config::{MonitorCliArgs, ServiceConfig};
/// Launch the service with a ready-made configuration.
pub use server::run;

mod annotation;
pub mod config;
mod data;
pub mod dns;
pub mod engine;
pub mod inventory;
pub mod pipeline;
pub mod server;
pub mod telemetry;
