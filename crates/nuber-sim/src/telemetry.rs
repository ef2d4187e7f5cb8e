//! Console logging for the simulator.
//!
//! Everything goes through `tracing_subscriber::fmt`. Verbosity follows
//! `RUST_LOG` and defaults to `info`, which is also the level of the
//! booking event log (`nuber::event`). To see only the event log:
//!
//! ```bash
//! RUST_LOG=nuber::event=info,warn cargo run -p nuber-sim -- --log-events
//! ```

use anyhow::Context;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        )
        .try_init()
        .context("failed to install the tracing subscriber")
}
