//! Telemetry helpers for the tracing subscriber and the Prometheus recorder.

use std::{io, sync::OnceLock, thread, time::Duration};

use anyhow::{Result, anyhow};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{debug, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, prelude::*};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROM_UPKEEP_THREAD: OnceLock<thread::JoinHandle<()>> = OnceLock::new();

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Install the global tracing subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Ensure the global metrics recorder is installed and return the Prometheus handle.
///
/// Returns `None` when another recorder already owns the global slot.
pub fn init_metrics_recorder() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Some(handle);
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if let Err(err) = metrics::set_global_recorder(recorder) {
        warn!("metrics recorder not installed: {err}");
        return None;
    }

    if PROM_UPKEEP_THREAD.get().is_none() {
        match spawn_upkeep(handle.clone(), UPKEEP_INTERVAL) {
            Ok(join) => {
                let _ = PROM_UPKEEP_THREAD.set(join);
            }
            Err(err) => warn!("failed to spawn prometheus upkeep thread: {err}"),
        }
    }

    let _ = PROM_HANDLE.set(handle);
    PROM_HANDLE.get()
}

/// Access the Prometheus handle when already initialised.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Record one finished HTTP request.
pub(crate) fn record_request(endpoint: &'static str, outcome: &'static str) {
    metrics::counter!("inventory_requests_total", "endpoint" => endpoint, "outcome" => outcome)
        .increment(1);
}

/// Drain histogram buckets every `interval`; the thread logs through the
/// service's tracing dispatcher, which a bare spawned thread would not see.
fn spawn_upkeep(handle: PrometheusHandle, interval: Duration) -> io::Result<thread::JoinHandle<()>> {
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name("prometheus-upkeep".into())
        .spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                debug!("prometheus upkeep every {interval:?}");
                loop {
                    thread::sleep(interval);
                    handle.run_upkeep();
                }
            })
        })
}
