//! Console logging for the benchmark binary.
//!
//! Events from the `ferrotask` library (worker lifecycle, shutdown, failed
//! tasks) and from the scenarios themselves are printed through
//! `tracing_subscriber::fmt`. Verbosity is taken from `RUST_LOG` and
//! defaults to `info`; use `RUST_LOG=ferrotask=debug` to see failed tasks or
//! `trace` for per-call spans.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_line_number(true)
                .with_target(false)
                .with_file(true),
        )
        .try_init()?;

    Ok(())
}
