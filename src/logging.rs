//! Diagnostic logging setup.
//!
//! All diagnostics go to stderr through `tracing`; stdout is reserved for
//! the final completion text so the binary stays pipe-friendly.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` raises the default
/// filter from warnings to debug output.
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "clipgen=debug"
    } else {
        "clipgen=warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
