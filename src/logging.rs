use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, or `info` when
/// it is unset or invalid. Calling this more than once, or after the host
/// installed its own subscriber, does nothing.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
