#![doc = include_str!("../README.md")]

mod config;
mod scenario;
mod telemetry;

use clap::Parser;
use config::{CliArgs, SimConfig};
use telemetry::init_telemetry;

// Using mimalloc for better performance under contention from the many slot
// threads allocating booking state.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = SimConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let summary = scenario::run(&config)?;
    summary.log();
    if summary.failed > 0 {
        anyhow::bail!("{} bookings did not complete", summary.failed);
    }
    Ok(())
}

fn log_startup_info(config: &SimConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting simulation with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting simulation with {} regions, {} drivers and {} passengers",
            config.regions.len(),
            config.drivers,
            config.passengers
        );
    }
}
