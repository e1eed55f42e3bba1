//! Tracing subscriber setup for binaries and tests.
use tracing_subscriber::{EnvFilter, fmt};

/// Install a formatted subscriber filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber is already installed, which makes
/// repeated calls from tests harmless.
pub fn init_tracing() -> bool {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).try_init().is_ok()
}
