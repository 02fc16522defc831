#![doc = include_str!("../README.md")]

mod config;
mod scenario;
mod telemetry;

use clap::Parser;
use config::{BenchConfig, CliArgs};
use telemetry::init_telemetry;

// Every submission allocates a handle slot and a queue record; mimalloc keeps
// that cheap when many submitters contend.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = BenchConfig::try_from(args)?;

    init_telemetry()?;

    if cfg!(debug_assertions) {
        tracing::warn!("Debug build; timings are not representative");
        tracing::info!("Running with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Running {:?} scenario with {} workers",
            config.scenario,
            config.workers
        );
    }

    scenario::run(&config)
}
