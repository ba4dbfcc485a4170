//! Diagnostic tracing.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. Product
//! output (progress lines, summaries) goes to stdout and the persisted record
//! is the CSV run log, neither of which depends on the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "gridsynth=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `gridsynth=info`. Output: stderr, compact.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
