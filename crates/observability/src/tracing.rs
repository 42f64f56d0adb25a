//! Structured JSON logging for the service.

use tracing_subscriber::EnvFilter;

/// Picks the filter: `RUST_LOG` when set and valid, otherwise
/// `default_level`, otherwise `info`.
fn filter_for(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global JSON subscriber. Later calls leave the first one in place.
pub fn init(default_level: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter_for(default_level))
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        ::tracing::debug!(default_level, "logging initialised");
    }
}
