//! Logging setup for the command line driver
//!
//! With the `profiling` feature, `profiling::scope!` markers in the library are emitted as
//! tracing spans and show up in the same output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize logging with sensible defaults
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    let fmt_layer = fmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    #[cfg(feature = "profiling")]
    tracing::info!("Logging initialized (profiling scopes emitted as spans)");
    #[cfg(not(feature = "profiling"))]
    tracing::info!("Logging initialized (profiling disabled in this build)");
}
