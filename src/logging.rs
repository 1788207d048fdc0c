//! Structured logging bootstrap. Initializes a `tracing-subscriber`
//! formatter writing JSON to a rolling file plus a human-readable layer on
//! stdout, matching the verbosity the caller asks for.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// The returned guard must be held for the lifetime of the process; dropping
/// it flushes and stops the background writer thread.
pub fn init(log_dir: &str, level: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "kong-discoveryd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_current_span(true)
        .init();

    guard
}
