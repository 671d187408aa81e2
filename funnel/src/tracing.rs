use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Install the process-wide subscriber. Filtering follows `RUST_LOG`,
/// defaulting to `info` when unset.
pub fn init() {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                ),
        )
        .init();
}
