//! Logging setup shared by the service binary and tests.

pub mod tracing;

/// Install JSON logging. `default_level` applies when `RUST_LOG` is unset.
pub fn init(default_level: &str) {
    tracing::init(default_level);
}
