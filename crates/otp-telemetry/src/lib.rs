//! Tracing initialization, the injectable [`Clock`] capability, and the
//! request-scoped [`RequestContext`] that every gateway component
//! boundary takes instead of reaching for ambient globals (§9).

pub mod clock;
pub mod context;
pub mod shutdown;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::RequestContext;
pub use shutdown::shutdown_signal;

/// Initializes the global `tracing` subscriber with a JSON formatter,
/// honoring `RUST_LOG`/`LOG_LEVEL` and falling back to `info` for the
/// gateway's own crates. Called exactly once, from the composition
/// root.
pub fn init_telemetry(default_filter: &str) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
