pub mod env;
pub mod kafka;
pub mod metrics;
pub mod probe_result;

/// Install the process-wide tracing subscriber, filtered by `RUST_LOG` (default `info`).
pub fn setup_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}
