//! Best-effort DuckDNS registration performed once at startup.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::monitor::config::DuckDnsConfig;

const DUCKDNS_UPDATE_URL: &str = "https://www.duckdns.org/update";
const DUCKDNS_TIMEOUT: Duration = Duration::from_secs(10);

/// Point the configured domain at this host's public address.
///
/// Uses the blocking client, so call it before the async runtime starts.
pub fn register(config: &DuckDnsConfig) -> Result<()> {
    let client = Client::builder()
        .timeout(DUCKDNS_TIMEOUT)
        .build()
        .context("failed to build DuckDNS client")?;

    let body = client
        .get(DUCKDNS_UPDATE_URL)
        .query(&[("domains", config.domain.as_str()), ("token", config.token.as_str())])
        .send()
        .context("DuckDNS request failed")?
        .error_for_status()
        .context("DuckDNS returned an error status")?
        .text()
        .context("failed to read DuckDNS response")?;

    let verdict = body.trim();
    if verdict != "OK" {
        bail!("DuckDNS rejected the update (response: {verdict:?})");
    }
    Ok(())
}

/// Register when configured; failures are logged and never abort startup.
pub fn register_best_effort(config: Option<&DuckDnsConfig>) {
    let Some(config) = config else {
        debug!("DuckDNS not configured; skipping registration");
        return;
    };
    match register(config) {
        Ok(()) => info!("DuckDNS updated for {}.duckdns.org", config.domain),
        Err(err) => warn!("DuckDNS registration skipped: {err:#}"),
    }
}
