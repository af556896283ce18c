//! Logging setup for the runner.

use surge_core::LogFormat;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the default `info` filter.
///
/// Logs go to stderr so a report written to stdout stays machine-readable.
pub fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match format {
        LogFormat::Pretty => builder.with_thread_ids(true).try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
        return;
    }
    tracing::debug!(format = ?format, "logging initialized");
}
