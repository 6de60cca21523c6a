mod cli;

use inventory_monitor::monitor::{self, telemetry};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = cli::parse_config()?;
    telemetry::init_tracing()?;
    monitor::run(config)
}
