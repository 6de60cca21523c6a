use anyhow::Result;
use clap::Parser;

use inventory_monitor::monitor::{MonitorCliArgs, ServiceConfig};

/// Parse process arguments (with environment fallbacks) into a validated config.
pub fn parse_config() -> Result<ServiceConfig> {
    let args = MonitorCliArgs::parse();
    ServiceConfig::try_from(args)
}
