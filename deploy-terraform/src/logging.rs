//! Diagnostics via `tracing`.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: step progress and process lifecycle, filtered by
//!   `RUST_LOG`, written to stderr.
//!
//! - **Tool output (`DeployContext::out`/`err`)**: terraform's own stdout and
//!   stderr, masked and forwarded line by line. Unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info`, or `debug` when `debug` is set.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=deploy_terraform=trace deploy-terraform --plan-only
/// ```
pub fn init(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
